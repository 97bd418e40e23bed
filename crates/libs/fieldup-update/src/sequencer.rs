//! Boot sequence orchestration.
//!
//! Every boot cycle passes through the states
//!
//! ```text
//! CheckRollback → FetchUpdates → RunApplication → MarkOutcome → Sleep
//! ```
//!
//! after which the next cycle starts over. The sequencer keeps no state from one cycle to
//! the next. Everything it decides is derived from the persisted state, so that a cycle
//! started in a fresh process after a power loss behaves exactly like a cycle started
//! in a running loop.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::counter::FailureCounter;
use crate::fetcher::{error_chain, FileReport, UpdateFetcher, UpdateSource};
use crate::outcome::{record_failure, record_success, BootAttempt};
use crate::rollback::{RollbackEngine, RollbackReport};
use crate::store::{FileStore, Recovery, TrackedFile};

/// Uncaught failure of the application.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApplicationFault {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApplicationFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// The application whose files are being tracked.
pub trait Application {
    /// Run the application once.
    ///
    /// Must only return `Ok` after all output the application is responsible for,
    /// e.g., refreshing a display, has been confirmed.
    fn run(&mut self) -> Result<(), ApplicationFault>;
}

/// Device-specific collaborators of the boot sequence.
pub trait Platform {
    /// Establish connectivity before checking for updates.
    ///
    /// Returns `false` if the device is offline, in which case no update is fetched.
    fn connect(&mut self) -> bool {
        true
    }

    /// Called after a rollback has been performed.
    #[allow(unused_variables)]
    fn rolled_back(&mut self, report: &RollbackReport) {}

    /// Suspend the device for the given duration.
    ///
    /// The device may lose power while suspended. All state has already been persisted
    /// when this is called.
    fn sleep(&mut self, duration: Duration);
}

/// Outcome of running the application.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Failure(ApplicationFault),
}

/// State of the boot sequence.
#[derive(Debug)]
pub enum BootState {
    /// Repair interrupted operations and roll back if necessary.
    CheckRollback,
    /// Check all tracked files for updates.
    FetchUpdates,
    /// Run the application.
    RunApplication,
    /// Persist the outcome of running the application.
    MarkOutcome(Outcome),
    /// Suspend until the next cycle.
    Sleep,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootState::CheckRollback => "CHECK_ROLLBACK",
            BootState::FetchUpdates => "FETCH_UPDATES",
            BootState::RunApplication => "RUN_APPLICATION",
            BootState::MarkOutcome(_) => "MARK_OUTCOME",
            BootState::Sleep => "SLEEP",
        })
    }
}

/// Configuration of the boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    /// Number of consecutive failures tolerated before rolling back.
    pub max_failures: u32,
    /// Time to sleep between cycles.
    pub sleep_interval: Duration,
}

/// State persisted across boot cycles.
///
/// Components receive this explicitly instead of reading ambient state.
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub store: FileStore,
    pub files: Vec<TrackedFile>,
    pub counter: FailureCounter,
    pub attempt: BootAttempt,
}

impl PersistedState {
    /// Persisted state in the given directory, with default file names.
    pub fn in_dir(dir: &Path, files: Vec<TrackedFile>) -> Self {
        Self {
            store: FileStore::new(dir),
            files,
            counter: FailureCounter::in_dir(dir),
            attempt: BootAttempt::in_dir(dir),
        }
    }

    pub fn fetcher(&self) -> UpdateFetcher<'_> {
        UpdateFetcher::new(&self.store, &self.files)
    }

    pub fn rollback_engine(&self, max_failures: u32) -> RollbackEngine<'_> {
        RollbackEngine::new(&self.store, &self.files, max_failures)
    }
}

/// What happened during a single boot cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Repairs of interrupted operations.
    pub recovered: Vec<(TrackedFile, Recovery)>,
    /// Whether a failure has been recorded for an interrupted previous cycle.
    pub settled_interrupted: bool,
    /// Rollback, if one has been performed.
    pub rollback: Option<RollbackReport>,
    /// Update status of every tracked file.
    pub updates: Vec<FileReport>,
    /// Fault of the application, if it failed.
    pub fault: Option<ApplicationFault>,
    /// Failure streak after recording the outcome, if it could be persisted.
    pub failure_count: Option<u32>,
}

impl CycleReport {
    /// Indicates whether the application completed successfully.
    pub fn succeeded(&self) -> bool {
        self.fault.is_none()
    }
}

/// Drives boot cycles.
pub struct BootSequencer<S, A, P> {
    state: PersistedState,
    config: SequencerConfig,
    source: S,
    application: A,
    platform: P,
}

impl<S: UpdateSource, A: Application, P: Platform> BootSequencer<S, A, P> {
    pub fn new(
        state: PersistedState,
        config: SequencerConfig,
        source: S,
        application: A,
        platform: P,
    ) -> Self {
        Self {
            state,
            config,
            source,
            application,
            platform,
        }
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn application_mut(&mut self) -> &mut A {
        &mut self.application
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Run boot cycles forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_cycle();
        }
    }

    /// Run a single boot cycle, ending after the device woke up from sleep.
    ///
    /// Errors are logged and never propagated, the next cycle always follows.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut state = BootState::CheckRollback;
        loop {
            info!("entering {state}");
            state = match state {
                BootState::CheckRollback => {
                    self.check_rollback(&mut report);
                    BootState::FetchUpdates
                }
                BootState::FetchUpdates => {
                    report.updates = self.fetch_updates();
                    BootState::RunApplication
                }
                BootState::RunApplication => BootState::MarkOutcome(self.run_application()),
                BootState::MarkOutcome(outcome) => {
                    report.failure_count = self.mark_outcome(&outcome);
                    if let Outcome::Failure(fault) = outcome {
                        report.fault = Some(fault);
                    }
                    BootState::Sleep
                }
                BootState::Sleep => {
                    info!(
                        "going to sleep for {} minute(s)",
                        self.config.sleep_interval.as_secs() / 60
                    );
                    self.platform.sleep(self.config.sleep_interval);
                    return report;
                }
            };
        }
    }

    fn check_rollback(&mut self, report: &mut CycleReport) {
        let state = &self.state;
        for file in &state.files {
            match state.store.recover(file) {
                Ok(Recovery::Nothing) => {}
                Ok(recovery) => {
                    warn!("repaired interrupted operation on {file}: {recovery:?}");
                    report.recovered.push((file.clone(), recovery));
                }
                Err(error) => error!("unable to repair {file}: {}", error_chain(&error)),
            }
        }
        match state.attempt.settle(&state.counter) {
            Ok(settled) => report.settled_interrupted = settled,
            Err(error) => error!("unable to settle interrupted boot: {}", error_chain(&error)),
        }
        let failures = match state.counter.read() {
            Ok(failures) => failures,
            Err(error) => {
                error!("{}, assuming 0", error_chain(&error));
                0
            }
        };
        let engine = state.rollback_engine(self.config.max_failures);
        if engine.needs_rollback(failures) {
            warn!(
                "boot failure count ({failures}) exceeds {}, rolling back",
                engine.max_failures()
            );
            let rollback = engine.rollback(&state.counter);
            self.platform.rolled_back(&rollback);
            report.rollback = Some(rollback);
        } else {
            info!(
                "boot failure count: {failures}/{}",
                self.config.max_failures
            );
        }
    }

    fn fetch_updates(&mut self) -> Vec<FileReport> {
        let fetcher = self.state.fetcher();
        if !self.platform.connect() {
            warn!("not connected, skipping update check");
            return fetcher.skip_all();
        }
        fetcher.fetch_all(&mut self.source)
    }

    fn run_application(&mut self) -> Outcome {
        let state = &self.state;
        // Must be persisted before the application starts.
        let failures = state.counter.read().unwrap_or(0);
        if let Err(error) = state.attempt.begin(failures) {
            error!("unable to mark boot attempt: {}", error_chain(&error));
        }
        let application = &mut self.application;
        match panic::catch_unwind(AssertUnwindSafe(|| application.run())) {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(fault)) => {
                error!("application failed: {}", error_chain(&fault));
                Outcome::Failure(fault)
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_owned());
                error!("application panicked: {message}");
                Outcome::Failure(ApplicationFault::new(format!(
                    "application panicked: {message}"
                )))
            }
        }
    }

    fn mark_outcome(&mut self, outcome: &Outcome) -> Option<u32> {
        let state = &self.state;
        let recorded = match outcome {
            Outcome::Success => record_success(&state.counter).map(|_| 0),
            Outcome::Failure(_) => record_failure(&state.counter),
        };
        match recorded {
            Ok(failures) => {
                if let Err(error) = state.attempt.finish() {
                    error!("unable to clear boot attempt: {}", error_chain(&error));
                }
                Some(failures)
            }
            Err(error) => {
                error!("unable to record boot outcome: {}", error_chain(&error));
                None
            }
        }
    }
}
