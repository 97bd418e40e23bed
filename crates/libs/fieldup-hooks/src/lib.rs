//! Executable hooks extending device operations.
//!
//! Hooks live in `<dir>/<operation>/<stage>/<rank>-<name>` and are run with the stage
//! as their only argument. Within a stage, hooks run ordered by rank.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use xscript::{run, Out, Run, Vars};

pub use crate::error::{HooksLoadError, HooksRunError};

mod error;

/// Default directory to load hooks from.
pub const DEFAULT_HOOKS_DIR: &str = "/etc/fieldup/hooks";

/// Collection of hooks for some operation.
#[derive(Debug, Clone)]
pub struct Hooks {
    /// Name of the operation.
    operation: &'static str,
    /// Sorted hooks grouped by stage.
    stages: HashMap<String, Vec<Hook>>,
}

impl Hooks {
    /// Operation without any hooks.
    pub fn empty(operation: &'static str) -> Self {
        Self {
            operation,
            stages: HashMap::new(),
        }
    }

    /// Hooks for the given stage, ordered by rank.
    pub fn hooks(&self, stage: &str) -> &[Hook] {
        self.stages.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indicates whether there are any hooks for the given stage.
    pub fn has_hooks(&self, stage: &str) -> bool {
        !self.hooks(stage).is_empty()
    }

    /// Run the hooks for the given stage, stopping at the first failing hook.
    pub fn run_hooks(&self, stage: &str, vars: Vars) -> Result<(), HooksRunError> {
        if !self.has_hooks(stage) {
            debug!("no hooks for \"{}/{}\"", self.operation, stage);
            return Ok(());
        }
        info!("running hooks for \"{}/{}\"", self.operation, stage);
        for hook in self.hooks(stage) {
            info!("running hook {}", hook.name);
            run!([&hook.path, stage]
                .with_vars(vars.clone())
                .with_stderr(Out::Capture)
                .with_stdout(Out::Capture))
            .map_err(|error| HooksRunError {
                operation: self.operation,
                stage: stage.to_owned(),
                hook: hook.name.clone(),
                source: error.into(),
            })?;
        }
        Ok(())
    }
}

/// Hook.
#[derive(Debug, Clone)]
pub struct Hook {
    /// Name of the hook.
    name: String,
    /// Rank of the hook.
    rank: u64,
    /// Path of the hook.
    path: PathBuf,
}

impl Hook {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> u64 {
        self.rank
    }
}

/// Loader for loading hooks.
#[derive(Debug, Clone)]
pub struct HooksLoader {
    /// Directory to load hooks from.
    directory: Cow<'static, Path>,
}

impl HooksLoader {
    /// Create a new loader for the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Cow::Owned(directory.into()),
        }
    }

    /// Load and return the hooks for a given operation.
    pub fn load_hooks(&self, operation: &'static str) -> Result<Hooks, HooksLoadError> {
        let operation_dir = self.directory.join(operation);
        let read_dir = match fs::read_dir(&operation_dir) {
            Ok(read_dir) => read_dir,
            // If the directory does not exist, then there are simply no hooks.
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(Hooks::empty(operation));
            }
            Err(source) => {
                return Err(HooksLoadError {
                    path: operation_dir,
                    source,
                })
            }
        };
        let mut stages = HashMap::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| HooksLoadError {
                path: operation_dir.clone(),
                source,
            })?;
            if entry.file_type().map(|t| !t.is_dir()).unwrap_or(true) {
                // Skip any entries that are not directories.
                continue;
            }
            let stage_name = entry.file_name().to_string_lossy().into_owned();
            let stage_dir = entry.path();
            let stage_hooks = load_stage(&stage_dir)?;
            stages.insert(stage_name, stage_hooks);
        }
        Ok(Hooks { operation, stages })
    }
}

impl Default for HooksLoader {
    fn default() -> Self {
        Self {
            directory: Cow::Borrowed(Path::new(DEFAULT_HOOKS_DIR)),
        }
    }
}

fn load_stage(stage_dir: &Path) -> Result<Vec<Hook>, HooksLoadError> {
    let read_error = |source| HooksLoadError {
        path: stage_dir.to_path_buf(),
        source,
    };
    let mut hooks = Vec::new();
    for entry in fs::read_dir(stage_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if entry.file_type().map(|t| !t.is_file()).unwrap_or(true) {
            // Skip any entries that are not files.
            continue;
        }
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();
        let Some((rank, name)) = filename.split_once('-') else {
            warn!("invalid hook filename {filename:?}, missing `-`");
            continue;
        };
        let Ok(rank) = rank.parse() else {
            warn!("invalid hook filename {filename:?}, invalid rank");
            continue;
        };
        hooks.push(Hook {
            name: name.to_owned(),
            rank,
            path: entry.path(),
        });
    }
    hooks.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
    Ok(hooks)
}
