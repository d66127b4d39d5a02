//! Dispatch gate: one command at a time per worker, only on a drained queue.
//!
//! A submission takes the worker's gate, waits until every frame left over
//! from earlier traffic has been consumed, obtains the channel and hands the
//! worker to the executor. Workers are gated independently.

mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use types::{DispatchError, DispatchStatus};

use crate::executor::{
    CommandExecutor, ExecError, ExecMode, ExecOutput, ExecRequest, FrameExecutor, ProgressSink,
};
use crate::registry::{ChannelRegistry, TransportError};

struct WorkerGate {
    turn: Mutex<()>,
    status: watch::Sender<DispatchStatus>,
}

impl WorkerGate {
    fn new() -> Self {
        let (status, _) = watch::channel(DispatchStatus::Idle);
        Self {
            turn: Mutex::new(()),
            status,
        }
    }
}

/// Puts the gate back to `Idle` however the submission ends.
struct StatusGuard<'a>(&'a watch::Sender<DispatchStatus>);

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(DispatchStatus::Idle);
    }
}

/// Serializes command submission per worker.
pub struct Dispatcher<E = FrameExecutor> {
    registry: ChannelRegistry,
    executor: Arc<E>,
    timeout: Option<Duration>,
    gates: Arc<RwLock<HashMap<String, Arc<WorkerGate>>>>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            executor: Arc::clone(&self.executor),
            timeout: self.timeout,
            gates: Arc::clone(&self.gates),
        }
    }
}

impl<E: CommandExecutor> Dispatcher<E> {
    pub fn new(registry: ChannelRegistry, executor: E) -> Self {
        Self {
            registry,
            executor: Arc::new(executor),
            timeout: None,
            gates: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bound each submission, drain wait included.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Current gate status of a worker.
    pub async fn status(&self, worker: &str) -> DispatchStatus {
        self.gates
            .read()
            .await
            .get(worker)
            .map_or(DispatchStatus::Idle, |gate| *gate.status.borrow())
    }

    /// Observe gate status changes of a worker.
    pub async fn watch_status(&self, worker: &str) -> watch::Receiver<DispatchStatus> {
        self.gate(worker).await.status.subscribe()
    }

    /// Submit a command to a worker and wait for its response.
    ///
    /// Dropping the returned future, cancelling `cancel` or hitting the
    /// configured timeout all release the worker's gate.
    pub async fn submit(
        &self,
        worker: &str,
        command: &str,
        mode: ExecMode,
        sink: Option<&ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, DispatchError> {
        let run = self.run(worker, command, mode, sink);
        let bounded = async {
            match self.timeout {
                Some(after) => match tokio::time::timeout(after, run).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(worker, timeout_ms = after.as_millis(), "Dispatch timed out");
                        Err(DispatchError::Timeout {
                            worker: worker.to_string(),
                            after,
                        })
                    }
                },
                None => run.await,
            }
        };

        let result = tokio::select! {
            () = cancel.cancelled() => {
                info!(worker, "Dispatch cancelled");
                Err(DispatchError::Cancelled { worker: worker.to_string() })
            }
            result = bounded => result,
        };
        if let Err(e) = &result {
            debug!(worker = e.worker(), error = %e, "Submission failed");
        }
        result
    }

    async fn run(
        &self,
        worker: &str,
        command: &str,
        mode: ExecMode,
        sink: Option<&ProgressSink>,
    ) -> Result<ExecOutput, DispatchError> {
        if self.registry.endpoint(worker).is_none() {
            return Err(TransportError::UnknownWorker {
                worker: worker.to_string(),
            }
            .into());
        }

        let gate = self.gate(worker).await;
        let _turn = gate.turn.lock().await;
        let _status = StatusGuard(&gate.status);
        gate.status.send_replace(DispatchStatus::AwaitingDrain);

        let queues = self.registry.queues();
        let backlog = queues.len(worker).await;
        if backlog > 0 {
            debug!(worker, backlog, "Waiting for worker queue to drain");
        }

        // Frames may arrive while the channel is being obtained.
        let channel = loop {
            queues.wait_idle(worker).await;
            let channel = self.registry.get_or_create(worker).await?;
            if queues.is_empty(worker).await {
                break channel;
            }
        };

        gate.status.send_replace(DispatchStatus::Dispatching);
        info!(worker, instance = channel.instance(), %mode, "Dispatching command");

        let result = self
            .executor
            .execute(ExecRequest {
                worker,
                command,
                mode,
                channel,
                sink,
                queues,
            })
            .await;

        if let Err(ExecError::Write(e)) = &result {
            warn!(worker, error = %e, "Write failed, invalidating channel");
            self.registry.invalidate(worker).await;
        }
        result.map_err(DispatchError::from)
    }

    async fn gate(&self, worker: &str) -> Arc<WorkerGate> {
        if let Some(gate) = self.gates.read().await.get(worker) {
            return Arc::clone(gate);
        }
        let mut gates = self.gates.write().await;
        Arc::clone(
            gates
                .entry(worker.to_string())
                .or_insert_with(|| Arc::new(WorkerGate::new())),
        )
    }
}
