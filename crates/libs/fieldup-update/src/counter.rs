//! Persisted failure counter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::CounterError;
use crate::store::write_atomic;

/// Default name of the counter file within the state directory.
pub const DEFAULT_COUNTER_FILE: &str = "failure_count.txt";

/// Number of consecutive failed boots, persisted as plain integer text.
///
/// Besides the generations of tracked files and the boot attempt marker, this is the
/// only state that survives from one boot cycle to the next. It has exactly two access methods,
/// [`FailureCounter::read`] and [`FailureCounter::write`].
#[derive(Debug, Clone)]
pub struct FailureCounter {
    path: PathBuf,
}

impl FailureCounter {
    /// Counter persisted at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Counter persisted in the given state directory under the default name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DEFAULT_COUNTER_FILE))
    }

    /// Path of the counter file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current value.
    ///
    /// A missing file reads as `0`. So does a file with invalid content, after logging a
    /// warning. Both cases can only under-count failures.
    pub fn read(&self) -> Result<u32, CounterError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                warn!("failure counter is not valid UTF-8, assuming 0");
                return Ok(0);
            }
            Err(source) => {
                return Err(CounterError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        match content.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("invalid failure counter {content:?}, assuming 0");
                Ok(0)
            }
        }
    }

    /// Atomically persist the given value.
    pub fn write(&self, value: u32) -> Result<(), CounterError> {
        write_atomic(&self.path, value.to_string().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_counter_reads_zero() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        assert_eq!(counter.read().unwrap(), 0);
        assert!(!counter.path().exists());
    }

    #[test]
    fn test_write_and_read() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        counter.write(7).unwrap();
        assert_eq!(fs::read_to_string(counter.path()).unwrap(), "7");
        assert_eq!(counter.read().unwrap(), 7);
    }

    #[test]
    fn test_lenient_parsing() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        fs::write(counter.path(), "3\n").unwrap();
        assert_eq!(counter.read().unwrap(), 3);
        fs::write(counter.path(), "").unwrap();
        assert_eq!(counter.read().unwrap(), 0);
        fs::write(counter.path(), "-1").unwrap();
        assert_eq!(counter.read().unwrap(), 0);
        fs::write(counter.path(), [0xff, 0xfe]).unwrap();
        assert_eq!(counter.read().unwrap(), 0);
    }
}
