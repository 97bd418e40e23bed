//! Restoring the previous generation of all tracked files.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::counter::FailureCounter;
use crate::store::{FileStore, Generation, TrackedFile};

/// Result of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Files whose previous generation is current now.
    pub restored: Vec<String>,
    /// Files without a previous generation, left untouched.
    pub unavailable: Vec<String>,
    /// Files for which the rollback failed, with the error.
    pub failed: Vec<(String, String)>,
    /// Whether the failure counter has been reset.
    pub counter_reset: bool,
}

impl RollbackReport {
    /// Indicates whether no file has been touched.
    pub fn is_noop(&self) -> bool {
        self.restored.is_empty() && self.failed.is_empty()
    }
}

/// Rolls tracked files back once the failure streak exceeds a threshold.
#[derive(Debug, Clone, Copy)]
pub struct RollbackEngine<'s> {
    store: &'s FileStore,
    files: &'s [TrackedFile],
    max_failures: u32,
}

impl<'s> RollbackEngine<'s> {
    pub fn new(store: &'s FileStore, files: &'s [TrackedFile], max_failures: u32) -> Self {
        Self {
            store,
            files,
            max_failures,
        }
    }

    /// Threshold the failure streak must exceed to trigger a rollback.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Indicates whether a streak of the given length requires a rollback.
    pub fn needs_rollback(&self, failures: u32) -> bool {
        failures > self.max_failures
    }

    /// Roll back every file that has a previous generation and reset the counter.
    ///
    /// The current generation of each such file is quarantined, replacing any older
    /// quarantined generation, and the previous generation becomes current. Files
    /// without a previous generation are left as they are. The counter is reset even
    /// if nothing could be rolled back, so that a missing backup does not lead to a
    /// rollback on every boot. Running it twice in a row without an intervening update
    /// touches no file the second time.
    pub fn rollback(&self, counter: &FailureCounter) -> RollbackReport {
        let mut report = RollbackReport::default();
        for file in self.files {
            if !self.store.exists(file, Generation::Previous) {
                warn!("no previous generation of {file}, unable to roll back");
                report.unavailable.push(file.name().to_owned());
                continue;
            }
            let result = self
                .store
                .quarantine_current(file)
                .and_then(|_| self.store.restore_previous(file));
            match result {
                Ok(_) => {
                    info!("rolled back {file}");
                    report.restored.push(file.name().to_owned());
                }
                Err(error) => {
                    error!("unable to roll back {file}: {error}");
                    report
                        .failed
                        .push((file.name().to_owned(), error.to_string()));
                }
            }
        }
        match counter.write(0) {
            Ok(()) => {
                report.counter_reset = true;
                info!("rollback complete, failure count reset");
            }
            Err(error) => {
                error!("unable to reset failure count after rollback: {error}");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_exclusive() {
        let store = FileStore::new("/nonexistent");
        let engine = RollbackEngine::new(&store, &[], 3);
        assert!(!engine.needs_rollback(0));
        assert!(!engine.needs_rollback(3));
        assert!(engine.needs_rollback(4));
    }

    #[test]
    fn test_rollback_restores_exact_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let counter = FailureCounter::in_dir(tempdir.path());
        let files: Vec<TrackedFile> = vec!["main.py".parse().unwrap()];
        store.install(&files[0], b"v1").unwrap();
        store.install(&files[0], b"v2").unwrap();
        counter.write(4).unwrap();

        let report = RollbackEngine::new(&store, &files, 3).rollback(&counter);
        assert_eq!(report.restored, ["main.py"]);
        assert!(report.counter_reset);
        assert_eq!(counter.read().unwrap(), 0);
        assert_eq!(store.read(&files[0], Generation::Current).unwrap().unwrap(), b"v1");
        assert_eq!(
            store.read(&files[0], Generation::Quarantined).unwrap().unwrap(),
            b"v2"
        );
        assert!(!store.exists(&files[0], Generation::Previous));
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let counter = FailureCounter::in_dir(tempdir.path());
        let files: Vec<TrackedFile> = vec![
            "main.py".parse().unwrap(),
            "weather_utils.py".parse().unwrap(),
        ];
        store.install(&files[0], b"v1").unwrap();
        store.install(&files[0], b"v2").unwrap();
        store.install(&files[1], b"u1").unwrap();
        let engine = RollbackEngine::new(&store, &files, 3);

        let first = engine.rollback(&counter);
        assert_eq!(first.restored, ["main.py"]);
        assert_eq!(first.unavailable, ["weather_utils.py"]);

        counter.write(5).unwrap();
        let second = engine.rollback(&counter);
        assert!(second.is_noop());
        assert_eq!(counter.read().unwrap(), 0);
        assert_eq!(store.read(&files[0], Generation::Current).unwrap().unwrap(), b"v1");
        assert_eq!(
            store.read(&files[0], Generation::Quarantined).unwrap().unwrap(),
            b"v2"
        );
        assert_eq!(store.read(&files[1], Generation::Current).unwrap().unwrap(), b"u1");
    }
}
