//! In-memory connectors shared by unit tests.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::config::Endpoint;
use crate::registry::{BoxedStream, ConnectFuture, Connector, ReconnectPolicy};

/// Guest half of every connection a `DuplexConnector` opens.
pub type GuestRx = mpsc::UnboundedReceiver<(String, DuplexStream)>;

/// Connector backed by `tokio::io::duplex` pipes.
pub struct DuplexConnector {
    guests: mpsc::UnboundedSender<(String, DuplexStream)>,
    connects: AtomicUsize,
}

impl DuplexConnector {
    pub fn new() -> (Self, GuestRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                guests: tx,
                connects: AtomicUsize::new(0),
            },
            rx,
        )
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for DuplexConnector {
    fn connect<'a>(&'a self, worker: &'a str, _endpoint: &'a Endpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (host, guest) = tokio::io::duplex(64 * 1024);
            self.guests
                .send((worker.to_string(), guest))
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no guest"))?;
            Ok(Box::new(host) as BoxedStream)
        })
    }
}

/// Connector whose every attempt is refused.
#[derive(Default)]
pub struct FailingConnector {
    attempts: AtomicUsize,
}

impl FailingConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FailingConnector {
    fn connect<'a>(&'a self, _worker: &'a str, _endpoint: &'a Endpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        })
    }
}

/// Reconnect policy with millisecond delays.
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_attempts: Some(5),
        reset_on_reconnect: false,
    }
}

/// Endpoint table with a placeholder TCP address per worker.
pub fn worker_map(workers: &[&str]) -> BTreeMap<String, Endpoint> {
    workers
        .iter()
        .enumerate()
        .map(|(i, w)| ((*w).to_string(), Endpoint::Tcp(format!("127.0.0.1:{}", 9000 + i))))
        .collect()
}
