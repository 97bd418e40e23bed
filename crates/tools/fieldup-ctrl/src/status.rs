//! State of the updater as reported by `fieldup-ctrl status`.

use std::path::PathBuf;

use serde::Serialize;

use fieldup_update::{Generation, GenerationInfo, PersistedState};

use crate::config::UpdaterConfig;
use crate::error::CtrlResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdaterStatus {
    pub state_dir: PathBuf,
    pub failure_count: u32,
    pub max_failures: u32,
    /// Whether the next boot cycle is going to roll back.
    pub rollback_pending: bool,
    /// Whether an application run has not been concluded.
    pub attempt_pending: bool,
    pub files: Vec<FileStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileStatus {
    pub name: String,
    pub current: Option<GenerationInfo>,
    pub previous: Option<GenerationInfo>,
    pub quarantined: Option<GenerationInfo>,
}

impl FileStatus {
    pub fn generation(&self, generation: Generation) -> &Option<GenerationInfo> {
        match generation {
            Generation::Current => &self.current,
            Generation::Previous => &self.previous,
            Generation::Quarantined => &self.quarantined,
        }
    }
}

impl UpdaterStatus {
    pub fn collect(config: &UpdaterConfig, state: &PersistedState) -> CtrlResult<Self> {
        let failure_count = state.counter.read()?;
        let files = state
            .files
            .iter()
            .map(|file| -> CtrlResult<FileStatus> {
                Ok(FileStatus {
                    name: file.name().to_owned(),
                    current: state.store.describe(file, Generation::Current)?,
                    previous: state.store.describe(file, Generation::Previous)?,
                    quarantined: state.store.describe(file, Generation::Quarantined)?,
                })
            })
            .collect::<CtrlResult<Vec<_>>>()?;
        // An unconcluded run is counted as a failure by the next boot cycle.
        let attempt_pending = state.attempt.is_pending();
        let rollback_pending = state
            .rollback_engine(config.max_failures)
            .needs_rollback(failure_count.saturating_add(u32::from(attempt_pending)));
        Ok(Self {
            state_dir: config.state_dir.clone(),
            failure_count,
            max_failures: config.max_failures,
            rollback_pending,
            attempt_pending,
            files,
        })
    }

    /// Print a human-readable summary to stderr.
    pub fn print(&self) {
        eprintln!("State Directory: {}", self.state_dir.display());
        eprintln!(
            "Failure Count: {}/{}{}",
            self.failure_count,
            self.max_failures,
            if self.rollback_pending {
                " (rollback pending)"
            } else {
                ""
            }
        );
        if self.attempt_pending {
            eprintln!("Application run has not been concluded.");
        }
        for file in &self.files {
            eprintln!("File {:?}:", file.name);
            for generation in Generation::ALL {
                match file.generation(generation) {
                    Some(info) => eprintln!(
                        "  {generation}: {} bytes, sha256:{}",
                        info.size, info.sha256
                    ),
                    None => eprintln!("  {generation}: <none>"),
                }
            }
        }
    }
}
