//! Channel registry: at most one live connection per worker.
//!
//! Channels are opened lazily on first use. When a connection fails the
//! registry recovers on its own: it marks the worker `Reconnecting`, waits
//! out the reconnect policy and opens a replacement under the same worker id.
//! Nothing is raised to callers in flight; they only observe that the next
//! `get_or_create` hands out a different channel instance.
//!
//! Each worker's frame codec lives in the registry rather than in a channel,
//! so a partial frame accumulated before a failure survives the replacement
//! unless `reset_on_reconnect` is set.

mod channel;
mod connector;
mod error;
mod policy;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use channel::WorkerChannel;
pub use connector::{BoxedStream, ConnectFuture, Connector, GuestStream, SocketConnector};
pub use error::TransportError;
pub use policy::ReconnectPolicy;

use crate::codec::{BoundaryMode, FrameCodec};
use crate::config::{Config, Endpoint};
use crate::queue::OutputQueues;

/// Size of the buffer each reader task reads into.
const READ_CHUNK_SIZE: usize = 64 * 1024;

type ReaderTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Connection state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for, or performing, reconnect attempt `attempt` (0 = not started yet).
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted; the next `get_or_create` starts over.
    Failed,
}

#[derive(Clone)]
struct SlotHandles {
    codec: Arc<Mutex<FrameCodec>>,
    connect_lock: Arc<Mutex<()>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

struct WorkerSlot {
    channel: Option<Arc<WorkerChannel>>,
    handles: SlotHandles,
}

impl WorkerSlot {
    fn new(boundary: BoundaryMode) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            channel: None,
            handles: SlotHandles {
                codec: Arc::new(Mutex::new(FrameCodec::new(boundary))),
                connect_lock: Arc::new(Mutex::new(())),
                state: Arc::new(state),
            },
        }
    }
}

struct Inner {
    endpoints: BTreeMap<String, Endpoint>,
    connector: Arc<dyn Connector>,
    queues: OutputQueues,
    policy: ReconnectPolicy,
    boundary: BoundaryMode,
    slots: RwLock<HashMap<String, WorkerSlot>>,
    next_instance: AtomicU64,
}

/// Thread-safe registry of worker channels.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Inner>,
}

impl ChannelRegistry {
    /// Create a registry with the default reconnect policy and framing.
    pub fn new(
        endpoints: BTreeMap<String, Endpoint>,
        queues: OutputQueues,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_options(
            endpoints,
            queues,
            connector,
            ReconnectPolicy::default(),
            BoundaryMode::default(),
        )
    }

    /// Create a registry with full configuration.
    pub fn with_options(
        endpoints: BTreeMap<String, Endpoint>,
        queues: OutputQueues,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        boundary: BoundaryMode,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints,
                connector,
                queues,
                policy,
                boundary,
                slots: RwLock::new(HashMap::new()),
                next_instance: AtomicU64::new(0),
            }),
        }
    }

    /// Create a registry from resolved configuration.
    pub fn from_config(config: &Config, queues: OutputQueues, connector: Arc<dyn Connector>) -> Self {
        Self::with_options(
            config.workers.clone(),
            queues,
            connector,
            ReconnectPolicy::from(&config.reconnect),
            config.framing.boundary,
        )
    }

    /// Queue store frames are delivered to.
    pub fn queues(&self) -> &OutputQueues {
        &self.inner.queues
    }

    /// Configured worker ids.
    pub fn workers(&self) -> Vec<String> {
        self.inner.endpoints.keys().cloned().collect()
    }

    /// Configured endpoint for a worker.
    pub fn endpoint(&self, worker: &str) -> Option<&Endpoint> {
        self.inner.endpoints.get(worker)
    }

    /// Get the live channel for a worker, if one is registered.
    pub async fn get(&self, worker: &str) -> Option<Arc<WorkerChannel>> {
        self.inner
            .slots
            .read()
            .await
            .get(worker)
            .and_then(|slot| slot.channel.clone())
            .filter(|channel| !channel.is_closed())
    }

    /// Return the live channel for a worker, connecting first if needed.
    ///
    /// Waits for an in-progress reconnect of the same worker instead of
    /// racing it. A worker whose channel just failed is only reconnected
    /// after the policy's first reconnect delay, whoever gets there first.
    pub async fn get_or_create(&self, worker: &str) -> Result<Arc<WorkerChannel>, TransportError> {
        let endpoint = self.require_endpoint(worker)?;
        if let Some(channel) = self.get(worker).await {
            return Ok(channel);
        }

        let handles = self.handles(worker).await;
        let _connecting = handles.connect_lock.lock().await;
        // Someone else may have connected while we waited for the lock.
        if let Some(channel) = self.get(worker).await {
            return Ok(channel);
        }
        let after_failure = matches!(
            *handles.state.borrow(),
            ConnectionState::Reconnecting { .. }
        );
        self.establish(worker, &endpoint, &handles, after_failure).await
    }

    /// Current connection state of a worker.
    pub async fn state(&self, worker: &str) -> ConnectionState {
        self.inner
            .slots
            .read()
            .await
            .get(worker)
            .map_or(ConnectionState::Disconnected, |slot| {
                *slot.handles.state.borrow()
            })
    }

    /// Observe connection state changes of a worker.
    pub async fn watch_state(
        &self,
        worker: &str,
    ) -> Result<watch::Receiver<ConnectionState>, TransportError> {
        self.require_endpoint(worker)?;
        Ok(self.handles(worker).await.state.subscribe())
    }

    /// Bytes of the partial frame currently accumulated for a worker.
    pub async fn pending_bytes(&self, worker: &str) -> Vec<u8> {
        let codec = {
            let slots = self.inner.slots.read().await;
            match slots.get(worker) {
                Some(slot) => Arc::clone(&slot.handles.codec),
                None => return Vec::new(),
            }
        };
        codec.lock().await.pending().to_vec()
    }

    /// Workers that currently hold a live channel.
    pub async fn connected_workers(&self) -> Vec<String> {
        let mut workers: Vec<String> = self
            .inner
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.channel.as_ref().is_some_and(|c| !c.is_closed()))
            .map(|(worker, _)| worker.clone())
            .collect();
        workers.sort();
        workers
    }

    /// Treat a worker's live channel as failed and schedule its replacement.
    ///
    /// Returns `false` when the worker had no live channel.
    pub async fn invalidate(&self, worker: &str) -> bool {
        let Some(channel) = self.get(worker).await else {
            return false;
        };
        self.fail(worker, channel.instance(), "invalidated").await
    }

    fn require_endpoint(&self, worker: &str) -> Result<Endpoint, TransportError> {
        self.endpoint(worker)
            .cloned()
            .ok_or_else(|| TransportError::UnknownWorker {
                worker: worker.to_string(),
            })
    }

    async fn handles(&self, worker: &str) -> SlotHandles {
        self.inner
            .slots
            .write()
            .await
            .entry(worker.to_string())
            .or_insert_with(|| WorkerSlot::new(self.inner.boundary))
            .handles
            .clone()
    }

    /// Connect, retrying per the reconnect policy. Caller holds the connect lock.
    async fn establish(
        &self,
        worker: &str,
        endpoint: &Endpoint,
        handles: &SlotHandles,
        after_failure: bool,
    ) -> Result<Arc<WorkerChannel>, TransportError> {
        let policy = &self.inner.policy;
        let mut attempt: u32 = 0;
        let mut last_error: Option<io::Error> = None;
        let mut delay_first = after_failure;

        if !after_failure {
            handles.state.send_replace(ConnectionState::Connecting);
        }

        loop {
            if delay_first {
                if !policy.should_retry(attempt) {
                    handles.state.send_replace(ConnectionState::Failed);
                    let source = last_error.unwrap_or_else(|| {
                        io::Error::new(io::ErrorKind::NotConnected, "reconnect disabled")
                    });
                    error!(worker, attempts = attempt, error = %source, "Giving up on worker");
                    return Err(TransportError::Failed {
                        worker: worker.to_string(),
                        endpoint: endpoint.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                handles
                    .state
                    .send_replace(ConnectionState::Reconnecting { attempt });
                debug!(worker, attempt, delay_ms = delay.as_millis(), "Reconnecting");
                tokio::time::sleep(delay).await;
            }
            delay_first = true;

            match self.open(worker, endpoint, handles).await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    warn!(worker, endpoint = %endpoint, attempt, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }
    }

    async fn open(
        &self,
        worker: &str,
        endpoint: &Endpoint,
        handles: &SlotHandles,
    ) -> io::Result<Arc<WorkerChannel>> {
        let stream = self.inner.connector.connect(worker, endpoint).await?;
        let (reader, writer) = tokio::io::split(stream);
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
        let shutdown = CancellationToken::new();
        let channel = Arc::new(WorkerChannel::new(
            worker.to_string(),
            instance,
            writer,
            shutdown.clone(),
        ));

        if let Some(slot) = self.inner.slots.write().await.get_mut(worker) {
            slot.channel = Some(Arc::clone(&channel));
        }
        handles.state.send_replace(ConnectionState::Connected);
        info!(worker, instance, endpoint = %endpoint, "Worker channel connected");

        tokio::spawn(self.clone().read_loop(
            worker.to_string(),
            instance,
            reader,
            Arc::clone(&handles.codec),
            shutdown,
        ));
        Ok(channel)
    }

    /// Reader task for one channel. Boxed so the task type does not depend
    /// on the recovery path it may start.
    fn read_loop(
        self,
        worker: String,
        instance: u64,
        mut reader: ReadHalf<BoxedStream>,
        codec: Arc<Mutex<FrameCodec>>,
        shutdown: CancellationToken,
    ) -> ReaderTask {
        Box::pin(async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let read = tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!(worker, instance, "Reader stopped");
                        return;
                    }
                    read = reader.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => {
                        self.fail(&worker, instance, "connection closed by guest")
                            .await;
                        return;
                    }
                    Ok(n) => self.deliver(&worker, &codec, &buf[..n]).await,
                    Err(e) => {
                        self.fail(&worker, instance, &e.to_string()).await;
                        return;
                    }
                }
            }
        })
    }

    async fn deliver(&self, worker: &str, codec: &Mutex<FrameCodec>, chunk: &[u8]) {
        let decoded = codec.lock().await.decode(chunk);
        if let Some(lost) = &decoded.dropped {
            warn!(worker, bytes = lost.len(), "Frame dropped at chunk boundary");
            #[cfg(feature = "metrics")]
            crate::metrics::record_dropped_frame(worker);
        }
        if !decoded.frames.is_empty() {
            #[cfg(feature = "metrics")]
            crate::metrics::record_frames(worker, decoded.frames.len());
            self.inner.queues.push(worker, decoded.frames).await;
        }
    }

    /// Retire channel `instance` of `worker` and spawn its replacement.
    async fn fail(&self, worker: &str, instance: u64, reason: &str) -> bool {
        let handles = {
            let mut slots = self.inner.slots.write().await;
            let Some(slot) = slots.get_mut(worker) else {
                return false;
            };
            if slot.channel.as_ref().map(|c| c.instance()) != Some(instance) {
                return false;
            }
            if let Some(channel) = slot.channel.take() {
                channel.close();
            }
            slot.handles
                .state
                .send_replace(ConnectionState::Reconnecting { attempt: 0 });
            slot.handles.clone()
        };
        warn!(worker, instance, reason, "Worker channel failed, scheduling reconnect");
        #[cfg(feature = "metrics")]
        crate::metrics::record_reconnect(worker);

        if self.inner.policy.reset_on_reconnect {
            let mut codec = handles.codec.lock().await;
            debug!(
                worker,
                mode = %codec.mode(),
                discarded = codec.pending().len(),
                "Resetting frame codec"
            );
            codec.reset();
            drop(codec);
            self.inner.queues.clear(worker).await;
        }

        let registry = self.clone();
        let worker = worker.to_string();
        tokio::spawn(async move { registry.recover(worker, handles).await });
        true
    }

    async fn recover(self, worker: String, handles: SlotHandles) {
        let Ok(endpoint) = self.require_endpoint(&worker) else {
            return;
        };
        let _connecting = handles.connect_lock.lock().await;
        if self.get(&worker).await.is_some() {
            debug!(worker, "Channel already replaced");
            return;
        }
        match self.establish(&worker, &endpoint, &handles, true).await {
            Ok(channel) => info!(worker, instance = channel.instance(), "Worker channel replaced"),
            Err(e) => error!(worker, error = %e, "Worker channel recovery failed"),
        }
    }
}
