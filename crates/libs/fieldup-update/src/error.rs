//! Error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error carrying out a filesystem operation on the state directory.
#[derive(Debug, Error)]
#[error("{action} ({path:?})")]
pub struct StoreError {
    /// Description of what we tried to do.
    action: &'static str,
    /// Path the operation failed on.
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl StoreError {
    pub(crate) fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Error reading or persisting the failure counter.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("unable to read failure counter from {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to persist failure counter")]
    Write(#[from] StoreError),
}

/// Error retrieving the remote content of a tracked file.
///
/// Fetch errors are transient. They are reported and retried on the next cycle but
/// never escalated.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote is unreachable, e.g., because the network is down.
    #[error("device is not connected")]
    NotConnected,
    /// The remote responded with something other than `200`.
    #[error("remote responded with status {status}")]
    Status { status: u16 },
    /// The remote responded with an empty body.
    #[error("remote content is empty")]
    Empty,
    /// The remote content exceeds the configured limit.
    #[error("remote content exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },
    /// Transport-level failure, e.g., DNS, TLS, or a timeout.
    #[error("unable to retrieve remote content")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}
