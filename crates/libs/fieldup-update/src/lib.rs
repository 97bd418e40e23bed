//! Self-update and boot-rollback management for unattended devices.
//!
//! A device tracks a small, fixed set of named files. On every boot cycle, it
//!
//! 1. recovers from operations interrupted by power loss and, if the failure streak
//!    exceeds the configured threshold, rolls every tracked file back to its previous
//!    generation ([`rollback`]),
//! 2. pulls the current content of every tracked file from a remote source and installs
//!    it if it changed ([`fetcher`]),
//! 3. runs the application and records the outcome in the persisted failure counter
//!    ([`outcome`]), and
//! 4. goes to sleep, after which the device restarts from the top.
//!
//! The [`sequencer`] ties these steps together. All decisions are reconstructed from
//! persisted state, i.e., the failure counter ([`counter`]) and the generations of the
//! tracked files ([`store`]), on every cycle.

pub mod counter;
pub mod error;
pub mod fetcher;
pub mod outcome;
pub mod rollback;
pub mod sequencer;
pub mod store;

pub use counter::FailureCounter;
pub use error::{CounterError, FetchError, StoreError};
pub use fetcher::{FetchStatus, FileReport, UpdateFetcher, UpdateSource};
pub use outcome::{record_failure, record_success, BootAttempt};
pub use rollback::{RollbackEngine, RollbackReport};
pub use sequencer::{
    Application, ApplicationFault, BootSequencer, BootState, CycleReport, Outcome,
    PersistedState, Platform, SequencerConfig,
};
pub use store::{
    FileStore, Generation, GenerationInfo, Installed, InvalidFileName, Recovery, TrackedFile,
};
