//! Updater configuration.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use fieldup_update::outcome::DEFAULT_ATTEMPT_FILE;
use fieldup_update::store::STAGED_SUFFIX;
use fieldup_update::{
    BootAttempt, FailureCounter, FileStore, Generation, PersistedState, SequencerConfig,
    TrackedFile,
};

use crate::error::{CtrlError, CtrlResult};

/// Path of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fieldup/updater.toml";

/// Configuration of the updater.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct UpdaterConfig {
    /// Location tracked files are fetched from, the file name is appended.
    pub base_url: String,
    /// Directory holding the tracked files and the persisted state.
    pub state_dir: PathBuf,
    /// Names of the tracked files.
    pub files: Vec<String>,
    /// Number of consecutive failures tolerated before rolling back.
    pub max_failures: u32,
    /// Counter file, relative to the state directory.
    pub counter_file: PathBuf,
    /// Directory to load hooks from.
    pub hooks_dir: PathBuf,
    pub fetch: FetchConfig,
    pub application: ApplicationConfig,
    pub sleep: SleepConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://raw.githubusercontent.com/grega/pico-projects/main/inky-frame-weather-dashboard/".to_owned(),
            state_dir: PathBuf::from("/var/lib/fieldup"),
            files: vec!["main.py".to_owned(), "weather_utils.py".to_owned()],
            max_failures: 3,
            counter_file: PathBuf::from(fieldup_update::counter::DEFAULT_COUNTER_FILE),
            hooks_dir: PathBuf::from(fieldup_hooks::DEFAULT_HOOKS_DIR),
            fetch: FetchConfig::default(),
            application: ApplicationConfig::default(),
            sleep: SleepConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct FetchConfig {
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Timeout of a single request in seconds.
    pub timeout_secs: u64,
    /// Maximal size of a tracked file in bytes.
    pub max_size: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "PicoUpdater/1.0".to_owned(),
            timeout_secs: 30,
            max_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ApplicationConfig {
    /// Command running the application, with the state directory as working directory.
    pub command: Vec<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            command: vec!["./main.py".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct SleepConfig {
    /// Time between two boot cycles.
    pub minutes: u64,
    /// Command suspending or powering down the device.
    pub command: Option<Vec<String>>,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            minutes: 30,
            command: None,
        }
    }
}

impl SleepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.minutes.saturating_mul(60))
    }
}

impl UpdaterConfig {
    /// Check the configuration for consistency.
    pub fn validate(&self) -> CtrlResult<()> {
        self.tracked_files()?;
        if self.sleep.minutes == 0 {
            return Err(CtrlError::InvalidConfig(
                "sleep interval must be at least one minute".to_owned(),
            ));
        }
        if self.application.command.is_empty() {
            return Err(CtrlError::InvalidConfig(
                "application command must not be empty".to_owned(),
            ));
        }
        if self.sleep.command.as_ref().is_some_and(Vec::is_empty) {
            return Err(CtrlError::InvalidConfig(
                "sleep command must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Tracked files in configuration order.
    pub fn tracked_files(&self) -> CtrlResult<Vec<TrackedFile>> {
        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(self.files.len());
        for name in &self.files {
            if !seen.insert(name.as_str()) {
                return Err(CtrlError::InvalidConfig(format!(
                    "file {name:?} is tracked twice"
                )));
            }
            let file = TrackedFile::new(name.as_str())?;
            self.check_state_collision(&file)?;
            files.push(file);
        }
        Ok(files)
    }

    /// Reject tracked files with a generation occupying a path of the persisted state.
    fn check_state_collision(&self, file: &TrackedFile) -> CtrlResult<()> {
        let mut state_paths = Vec::new();
        for path in [
            self.state_dir.join(&self.counter_file),
            self.state_dir.join(DEFAULT_ATTEMPT_FILE),
        ] {
            let mut staged = path.clone().into_os_string();
            staged.push(STAGED_SUFFIX);
            state_paths.push(path);
            state_paths.push(PathBuf::from(staged));
        }
        let suffixes = Generation::ALL
            .map(Generation::suffix)
            .into_iter()
            .chain([STAGED_SUFFIX]);
        for suffix in suffixes {
            let path = self.state_dir.join(format!("{}{suffix}", file.name()));
            if state_paths.contains(&path) {
                return Err(CtrlError::InvalidConfig(format!(
                    "file {file} collides with state file {path:?}"
                )));
            }
        }
        Ok(())
    }

    /// Remote location of a tracked file.
    pub fn file_url(&self, file: &TrackedFile) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, file.name())
        } else {
            format!("{}/{}", self.base_url, file.name())
        }
    }

    pub fn counter(&self) -> FailureCounter {
        FailureCounter::new(self.state_dir.join(&self.counter_file))
    }

    pub fn persisted_state(&self) -> CtrlResult<PersistedState> {
        Ok(PersistedState {
            store: FileStore::new(&self.state_dir),
            files: self.tracked_files()?,
            counter: self.counter(),
            attempt: BootAttempt::in_dir(&self.state_dir),
        })
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            max_failures: self.max_failures,
            sleep_interval: self.sleep.interval(),
        }
    }

    /// Create the state directory if it does not exist yet.
    pub fn ensure_state_dir(&self) -> CtrlResult<()> {
        fs::create_dir_all(&self.state_dir).map_err(|source| CtrlError::StateDir {
            path: self.state_dir.clone(),
            source,
        })
    }
}

/// Load the configuration, falling back to the defaults if the file does not exist.
pub fn load_config(path: &Path) -> CtrlResult<UpdaterConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path).map_err(|source| CtrlError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CtrlError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        UpdaterConfig::default()
    };
    config.validate()?;
    Ok(config)
}
