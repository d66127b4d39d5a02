//! A live connection to one guest worker.

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::connector::BoxedStream;
use super::error::TransportError;

/// Write side of a worker connection plus its identity.
///
/// The read side is owned by a background task that feeds the worker's
/// frame codec. Only the registry closes a channel, when it retires the
/// connection and opens a replacement.
pub struct WorkerChannel {
    worker: String,
    instance: u64,
    writer: Mutex<WriteHalf<BoxedStream>>,
    shutdown: CancellationToken,
}

impl WorkerChannel {
    pub(crate) fn new(
        worker: String,
        instance: u64,
        writer: WriteHalf<BoxedStream>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            worker,
            instance,
            writer: Mutex::new(writer),
            shutdown,
        }
    }

    /// Worker this channel is bound to.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Process-unique connection number; replacements get a new one.
    pub const fn instance(&self) -> u64 {
        self.instance
    }

    /// Whether the registry has already given up on this connection.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Write raw bytes to the guest.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        result.map_err(|source| TransportError::Write {
            worker: self.worker.clone(),
            source,
        })
    }

    /// Stop the reader task for this connection.
    pub(crate) fn close(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("worker", &self.worker)
            .field("instance", &self.instance)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
