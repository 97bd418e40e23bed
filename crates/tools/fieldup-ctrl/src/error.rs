use std::io;
use std::path::PathBuf;

use thiserror::Error;

use fieldup_update::{CounterError, InvalidFileName, StoreError};

pub type CtrlResult<T> = Result<T, CtrlError>;

#[derive(Debug, Error)]
pub enum CtrlError {
    #[error("unable to read configuration file {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse configuration file {path:?}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid tracked file")]
    TrackedFile(#[from] InvalidFileName),
    #[error("unable to create state directory {path:?}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Counter(#[from] CounterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unable to roll back {0} file(s)")]
    RollbackFailed(usize),
    #[error("unable to write status")]
    Output(#[from] serde_json::Error),
}
