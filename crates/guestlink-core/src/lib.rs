//! guestlink Core Library
//!
//! Transport plumbing between a host and agents running inside guest
//! workers:
//! - NUL-delimited frame decoding
//! - Per-worker output queues
//! - Worker channel registry with automatic reconnection
//! - Dispatch gate and command executor
//! - Configuration hierarchy and common error types

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod tracing_init;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{BoundaryMode, FrameCodec};
pub use config::{Config, Endpoint};
pub use dispatch::{DispatchError, DispatchStatus, Dispatcher};
pub use error::{Error, Result};
pub use executor::{CommandExecutor, ExecMode, ExecOutput, FrameExecutor, Progress, ProgressSink};
pub use queue::OutputQueues;
pub use registry::{ChannelRegistry, ConnectionState, SocketConnector, TransportError};
