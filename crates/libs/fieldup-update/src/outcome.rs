//! Recording the outcome of a boot cycle.
//!
//! Before the application runs, a [`BootAttempt`] marker is set. It is cleared once the
//! outcome has been recorded. If the device loses power or resets in between, the
//! marker survives and the next boot accounts for the interrupted cycle as a failure.
//! This biases towards rollback rather than towards false success.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::counter::FailureCounter;
use crate::error::{CounterError, StoreError};
use crate::store::write_atomic;

/// Default name of the boot attempt marker within the state directory.
pub const DEFAULT_ATTEMPT_FILE: &str = "boot_attempt.txt";

/// Record a successful boot, resetting the failure streak.
///
/// Must only be called once the application has completed the cycle, including all
/// output side effects it depends on.
pub fn record_success(counter: &FailureCounter) -> Result<(), CounterError> {
    counter.write(0)?;
    debug!("boot marked as successful");
    Ok(())
}

/// Record a failed boot, extending the failure streak by one.
///
/// Returns the new length of the streak. The value is persisted before returning.
pub fn record_failure(counter: &FailureCounter) -> Result<u32, CounterError> {
    let failures = counter.read()?.saturating_add(1);
    counter.write(failures)?;
    warn!("boot marked as failed, {failures} consecutive failure(s)");
    Ok(failures)
}

/// Marker for a cycle whose application has started but whose outcome is unrecorded.
///
/// The marker stores the counter value at the time the application was started. If the
/// counter still holds that value when the marker is found on the next boot, the outcome
/// has never been recorded.
#[derive(Debug, Clone)]
pub struct BootAttempt {
    path: PathBuf,
}

impl BootAttempt {
    /// Marker persisted at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker persisted in the given state directory under the default name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DEFAULT_ATTEMPT_FILE))
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Indicates whether an attempt is pending.
    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }

    /// Set the marker before running the application.
    pub fn begin(&self, failures: u32) -> Result<(), CounterError> {
        write_atomic(&self.path, failures.to_string().as_bytes())?;
        Ok(())
    }

    /// Clear the marker after the outcome has been recorded.
    pub fn finish(&self) -> Result<(), CounterError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(StoreError::new("unable to clear boot attempt", &self.path, error).into())
            }
        }
    }

    /// Account for an interrupted cycle of a previous boot.
    ///
    /// Returns `true` if a failure has been recorded for it.
    pub fn settle(&self, counter: &FailureCounter) -> Result<bool, CounterError> {
        let started_with = match fs::read_to_string(&self.path) {
            Ok(content) => content.trim().parse::<u32>().ok(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) if error.kind() == io::ErrorKind::InvalidData => None,
            Err(source) => {
                return Err(CounterError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let recorded = match started_with {
            Some(started_with) => counter.read()? != started_with,
            None => false,
        };
        if !recorded {
            warn!("previous boot cycle ended before its outcome was recorded");
            record_failure(counter)?;
        }
        self.finish()?;
        Ok(!recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_increase_monotonically() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        for expected in 1..=10 {
            assert_eq!(record_failure(&counter).unwrap(), expected);
            assert_eq!(counter.read().unwrap(), expected);
        }
        record_success(&counter).unwrap();
        assert_eq!(counter.read().unwrap(), 0);
        assert_eq!(record_failure(&counter).unwrap(), 1);
    }

    #[test]
    fn test_failure_saturates() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        counter.write(u32::MAX).unwrap();
        assert_eq!(record_failure(&counter).unwrap(), u32::MAX);
    }

    #[test]
    fn test_interrupted_attempt_counts_as_failure() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        let attempt = BootAttempt::in_dir(tempdir.path());
        counter.write(2).unwrap();
        attempt.begin(2).unwrap();
        // Power loss while the application runs.
        assert!(attempt.settle(&counter).unwrap());
        assert_eq!(counter.read().unwrap(), 3);
        assert!(!attempt.is_pending());
        assert!(!attempt.settle(&counter).unwrap());
        assert_eq!(counter.read().unwrap(), 3);
    }

    #[test]
    fn test_recorded_failure_is_not_counted_twice() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        let attempt = BootAttempt::in_dir(tempdir.path());
        attempt.begin(0).unwrap();
        record_failure(&counter).unwrap();
        // Power loss before the marker has been cleared.
        assert!(!attempt.settle(&counter).unwrap());
        assert_eq!(counter.read().unwrap(), 1);
    }

    #[test]
    fn test_unclear_success_counts_as_failure() {
        let tempdir = tempfile::tempdir().unwrap();
        let counter = FailureCounter::in_dir(tempdir.path());
        let attempt = BootAttempt::in_dir(tempdir.path());
        attempt.begin(0).unwrap();
        record_success(&counter).unwrap();
        // Indistinguishable from a crash while running the application.
        assert!(attempt.settle(&counter).unwrap());
        assert_eq!(counter.read().unwrap(), 1);
    }
}
