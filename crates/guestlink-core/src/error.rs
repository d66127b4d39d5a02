//! Error types for the guestlink core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the guestlink [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for configuration and setup.
///
/// Transport, dispatch and executor failures have their own types next to
/// the components that raise them.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A settings file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A settings file is not valid JSON
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The merged settings do not describe a valid configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
