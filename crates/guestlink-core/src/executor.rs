//! Command execution over a worker channel.
//!
//! The dispatch gate hands an executor a drained worker queue and a live
//! channel. The executor writes the command and consumes frames from the
//! queue until it decides the response is complete.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::queue::OutputQueues;
use crate::registry::{TransportError, WorkerChannel};

/// How the response to a command is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// A single frame answers the command.
    #[default]
    Exec,
    /// Matches stream back one frame each until an empty frame.
    Search,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exec => write!(f, "exec"),
            Self::Search => write!(f, "search"),
        }
    }
}

/// Intermediate result forwarded while a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub worker: String,
    pub frame: String,
}

pub type ProgressSink = mpsc::Sender<Progress>;

/// Everything an executor needs for one command.
pub struct ExecRequest<'a> {
    pub worker: &'a str,
    pub command: &'a str,
    pub mode: ExecMode,
    pub channel: Arc<WorkerChannel>,
    pub sink: Option<&'a ProgressSink>,
    pub queues: &'a OutputQueues,
}

/// Frames that made up a command's response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub frames: Vec<String>,
}

impl ExecOutput {
    /// Frames joined by newlines.
    pub fn text(&self) -> String {
        self.frames.join("\n")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to send command: {0}")]
    Write(#[from] TransportError),

    #[error("Channel to worker {worker} closed before the command was sent")]
    ChannelClosed { worker: String },
}

impl ExecError {
    pub fn worker(&self) -> &str {
        match self {
            Self::Write(e) => e.worker(),
            Self::ChannelClosed { worker } => worker,
        }
    }
}

/// Runs one command against a worker.
///
/// Implementations own the worker's queue for the duration of the call and
/// must not submit further commands.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: ExecRequest<'_>,
    ) -> impl Future<Output = Result<ExecOutput, ExecError>> + Send;
}

/// Line-oriented executor for the guest agent protocol.
///
/// Sends the command terminated by a newline. In `Exec` mode the next frame
/// is the result; in `Search` mode every non-empty frame is a match and an
/// empty frame ends the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameExecutor;

impl CommandExecutor for FrameExecutor {
    async fn execute(&self, request: ExecRequest<'_>) -> Result<ExecOutput, ExecError> {
        let ExecRequest {
            worker,
            command,
            mode,
            channel,
            sink,
            queues,
        } = request;

        if channel.is_closed() {
            return Err(ExecError::ChannelClosed {
                worker: worker.to_string(),
            });
        }

        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        channel.send(&line).await?;
        debug!(worker, instance = channel.instance(), %mode, "Command sent");

        match mode {
            ExecMode::Exec => {
                let frame = queues.next_frame(worker).await;
                Ok(ExecOutput {
                    frames: vec![frame],
                })
            }
            ExecMode::Search => {
                let mut frames = Vec::new();
                loop {
                    let frame = queues.next_frame(worker).await;
                    if frame.is_empty() {
                        break;
                    }
                    if let Some(sink) = sink {
                        let progress = Progress {
                            worker: worker.to_string(),
                            frame: frame.clone(),
                        };
                        if sink.send(progress).await.is_err() {
                            debug!(worker, "Progress receiver dropped");
                        }
                    }
                    frames.push(frame);
                }
                debug!(worker, matches = frames.len(), "Search complete");
                Ok(ExecOutput { frames })
            }
        }
    }
}
