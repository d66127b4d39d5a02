//! Dispatch gate types.

use std::time::Duration;

use crate::executor::ExecError;
use crate::registry::TransportError;

/// Where a worker's gate currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchStatus {
    #[default]
    Idle,
    /// A submission holds the gate and waits for the queue to empty.
    AwaitingDrain,
    /// The executor owns the worker.
    Dispatching,
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingDrain => write!(f, "awaiting drain"),
            Self::Dispatching => write!(f, "dispatching"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch to worker {worker} timed out after {after:?}")]
    Timeout { worker: String, after: Duration },

    #[error("Dispatch to worker {worker} cancelled")]
    Cancelled { worker: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl DispatchError {
    /// Worker the failed submission was addressed to.
    pub fn worker(&self) -> &str {
        match self {
            Self::Timeout { worker, .. } | Self::Cancelled { worker } => worker,
            Self::Transport(e) => e.worker(),
            Self::Exec(e) => e.worker(),
        }
    }
}
