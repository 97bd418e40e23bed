use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error loading hooks.
#[derive(Debug, Error)]
#[error("unable to read hooks in {path:?}")]
pub struct HooksLoadError {
    pub(crate) path: PathBuf,
    #[source]
    pub(crate) source: io::Error,
}

/// Error running hooks.
#[derive(Debug, Error)]
#[error("hook \"{operation}/{stage}/{hook}\" failed")]
pub struct HooksRunError {
    pub(crate) operation: &'static str,
    pub(crate) stage: String,
    pub(crate) hook: String,
    #[source]
    pub(crate) source: Box<dyn std::error::Error + Send + Sync>,
}
