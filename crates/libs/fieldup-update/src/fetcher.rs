//! Pulling tracked files from a remote source.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::FetchError;
use crate::store::{FileStore, Generation, TrackedFile};

/// Remote source of tracked files.
pub trait UpdateSource {
    /// Retrieve the remote content of the given file.
    fn fetch(&mut self, file: &TrackedFile) -> Result<Vec<u8>, FetchError>;
}

impl<S: UpdateSource + ?Sized> UpdateSource for &mut S {
    fn fetch(&mut self, file: &TrackedFile) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(file)
    }
}

/// Status of a single file after an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStatus {
    /// The remote content is identical to the current generation.
    Unchanged,
    /// The remote content has been installed as the new current generation.
    Updated,
    /// The remote content is identical to the quarantined generation.
    Rejected,
    /// The remote content could not be retrieved.
    FetchFailed,
    /// The remote content has been retrieved but could not be installed.
    InstallFailed,
}

impl FetchStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Unchanged => "unchanged",
            FetchStatus::Updated => "updated",
            FetchStatus::Rejected => "rejected",
            FetchStatus::FetchFailed => "fetch-failed",
            FetchStatus::InstallFailed => "install-failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an update check for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file: TrackedFile,
    pub status: FetchStatus,
}

/// Fetches tracked files and installs changed content.
///
/// Nothing but the filesystem is touched. An installed update only takes effect once
/// the application loads the current generation again.
#[derive(Debug, Clone, Copy)]
pub struct UpdateFetcher<'s> {
    store: &'s FileStore,
    files: &'s [TrackedFile],
}

impl<'s> UpdateFetcher<'s> {
    pub fn new(store: &'s FileStore, files: &'s [TrackedFile]) -> Self {
        Self { store, files }
    }

    /// Check all tracked files for updates.
    ///
    /// Failures are reported per file and never abort the check of other files.
    pub fn fetch_all<S: UpdateSource>(&self, source: &mut S) -> Vec<FileReport> {
        self.files
            .iter()
            .map(|file| FileReport {
                file: file.clone(),
                status: self.fetch_file(source, file),
            })
            .collect()
    }

    /// Report all tracked files as not fetched, e.g., because there is no connectivity.
    pub fn skip_all(&self) -> Vec<FileReport> {
        self.files
            .iter()
            .map(|file| FileReport {
                file: file.clone(),
                status: FetchStatus::FetchFailed,
            })
            .collect()
    }

    /// Check a single file for updates.
    pub fn fetch_file<S: UpdateSource>(&self, source: &mut S, file: &TrackedFile) -> FetchStatus {
        let content = match source.fetch(file) {
            Ok(content) => content,
            Err(error) => {
                warn!("error fetching {file}: {}", error_chain(&error));
                return FetchStatus::FetchFailed;
            }
        };
        match self.store.read(file, Generation::Current) {
            Ok(Some(current)) if current == content => {
                debug!("{file} is up to date");
                return FetchStatus::Unchanged;
            }
            Ok(_) => { /* changed or not installed yet */ }
            Err(error) => {
                // Try to replace it anyway, installing fails if the slot is unusable.
                warn!("unable to compare {file} with remote content: {error}");
            }
        }
        // A quarantined generation must never be re-activated automatically.
        if let Ok(Some(quarantined)) = self.store.read(file, Generation::Quarantined) {
            if quarantined == content {
                warn!("remote content of {file} has been quarantined before, not installing");
                return FetchStatus::Rejected;
            }
        }
        match self.store.install(file, &content) {
            Ok(installed) => {
                if installed.backed_up {
                    info!("updated {file}, kept former version as previous generation");
                } else {
                    info!("installed {file}");
                }
                FetchStatus::Updated
            }
            Err(error) => {
                error!("unable to install update of {file}: {error}");
                FetchStatus::InstallFailed
            }
        }
    }
}

/// Render an error and its sources on a single line.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
