//! Worker transport error types.

/// Errors raised while obtaining or writing to a worker channel.
///
/// Read-side failures are never surfaced here: the registry recovers from
/// them in the background.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown worker: {worker}")]
    UnknownWorker { worker: String },

    #[error("Worker {worker} at {endpoint} unreachable after {attempts} reconnect attempts: {source}")]
    Failed {
        worker: String,
        endpoint: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to worker {worker} failed: {source}")]
    Write {
        worker: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Worker the error concerns.
    pub fn worker(&self) -> &str {
        match self {
            Self::UnknownWorker { worker }
            | Self::Failed { worker, .. }
            | Self::Write { worker, .. } => worker,
        }
    }
}
