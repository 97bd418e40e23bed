//! Generations of tracked files.
//!
//! All generations of all tracked files live in a single state directory. For a tracked
//! file `main.py`, the generations are stored as:
//!
//! - `main.py`: the current generation,
//! - `main.py.prev`: the previous generation,
//! - `main.py.bad`: the quarantined generation.
//!
//! Fetched content is first staged as `main.py.new` and synchronized to disk before any
//! existing generation is touched. Every step after that is a single rename.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

use crate::error::StoreError;

/// Suffix of the previous generation.
pub const PREVIOUS_SUFFIX: &str = ".prev";

/// Suffix of the quarantined generation.
pub const QUARANTINED_SUFFIX: &str = ".bad";

/// Suffix of staged content that has not been promoted yet.
pub const STAGED_SUFFIX: &str = ".new";

const RESERVED_SUFFIXES: [&str; 3] = [PREVIOUS_SUFFIX, QUARANTINED_SUFFIX, STAGED_SUFFIX];

/// Generation of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Generation {
    /// Version the application executes on the next boot.
    Current,
    /// Version that was current before the last replacement.
    Previous,
    /// Version moved aside by a rollback, never re-activated automatically.
    Quarantined,
}

impl Generation {
    /// All generations.
    pub const ALL: [Generation; 3] = [Self::Current, Self::Previous, Self::Quarantined];

    /// Suffix appended to the name of the tracked file.
    pub const fn suffix(self) -> &'static str {
        match self {
            Generation::Current => "",
            Generation::Previous => PREVIOUS_SUFFIX,
            Generation::Quarantined => QUARANTINED_SUFFIX,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Generation::Current => "current",
            Generation::Previous => "previous",
            Generation::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid name of a tracked file.
#[derive(Debug, Error)]
#[error("invalid tracked file name {name:?}: {reason}")]
pub struct InvalidFileName {
    name: String,
    reason: &'static str,
}

/// File tracked by the update mechanism, identified by a stable logical name.
///
/// The name is a plain file name within the state directory. It doubles as the path
/// appended to the base location of the remote source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedFile {
    name: String,
}

impl TrackedFile {
    /// Create a tracked file with the given name.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidFileName> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name == "." || name == ".." {
            Some("name is a relative path component")
        } else if name.contains(['/', '\\', '\0']) {
            Some("name must not contain path separators")
        } else if RESERVED_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
        {
            Some("name ends with a reserved suffix")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidFileName { name, reason }),
            None => Ok(Self { name }),
        }
    }

    /// Logical name of the file.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for TrackedFile {
    type Err = InvalidFileName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TrackedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Size and digest of a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationInfo {
    /// Size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 digest of the content.
    pub sha256: String,
}

/// Result of [`FileStore::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    /// Whether the former current generation has been moved to the previous slot.
    pub backed_up: bool,
}

/// Repair performed by [`FileStore::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recovery {
    /// Nothing had to be repaired.
    Nothing,
    /// Staged content of an interrupted installation has been removed.
    DiscardedStaged,
    /// Fully staged content of an interrupted installation has been made current.
    PromotedStaged,
    /// The current generation was missing and the previous one has been restored.
    RestoredPrevious,
}

/// Store for the generations of tracked files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store for the given state directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// State directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the given generation of a tracked file.
    pub fn path(&self, file: &TrackedFile, generation: Generation) -> PathBuf {
        self.dir
            .join(format!("{}{}", file.name(), generation.suffix()))
    }

    /// Path of the staged content of a tracked file.
    pub fn staged_path(&self, file: &TrackedFile) -> PathBuf {
        self.dir.join(format!("{}{STAGED_SUFFIX}", file.name()))
    }

    /// Indicates whether the given generation exists.
    pub fn exists(&self, file: &TrackedFile, generation: Generation) -> bool {
        self.path(file, generation).exists()
    }

    /// Read the content of the given generation, if it exists.
    pub fn read(
        &self,
        file: &TrackedFile,
        generation: Generation,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(file, generation);
        match fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::new("unable to read generation", path, error)),
        }
    }

    /// Size and digest of the given generation, if it exists.
    pub fn describe(
        &self,
        file: &TrackedFile,
        generation: Generation,
    ) -> Result<Option<GenerationInfo>, StoreError> {
        Ok(self
            .read(file, generation)?
            .map(|content| GenerationInfo {
                size: content.len() as u64,
                sha256: hex::encode(Sha256::digest(&content)),
            }))
    }

    /// Install the given content as the new current generation.
    ///
    /// The content is staged and synchronized first. Only then is the current
    /// generation moved to the previous slot, replacing any older previous generation,
    /// and the staged content renamed into place. If staging fails, no generation is
    /// touched. A power loss after staging is repaired by [`FileStore::recover`].
    pub fn install(&self, file: &TrackedFile, content: &[u8]) -> Result<Installed, StoreError> {
        self.stage(file, content)?;
        let backed_up = self.back_up_current(file)?;
        self.promote_staged(file)?;
        Ok(Installed { backed_up })
    }

    /// Write the given content to the staging slot and synchronize it to disk.
    ///
    /// The content is written under a temporary name first, so the staging slot only
    /// ever holds complete content.
    pub fn stage(&self, file: &TrackedFile, content: &[u8]) -> Result<(), StoreError> {
        trace!("staging {} bytes for {file}", content.len());
        write_atomic(&self.staged_path(file), content)
    }

    /// Move the current generation to the previous slot.
    ///
    /// Returns `false` if there is no current generation.
    pub fn back_up_current(&self, file: &TrackedFile) -> Result<bool, StoreError> {
        rename_if_exists(
            &self.path(file, Generation::Current),
            &self.path(file, Generation::Previous),
            "unable to move current generation to previous slot",
        )
    }

    /// Make the staged content the current generation.
    pub fn promote_staged(&self, file: &TrackedFile) -> Result<(), StoreError> {
        let staged = self.staged_path(file);
        fs::rename(&staged, self.path(file, Generation::Current))
            .map_err(|error| StoreError::new("unable to promote staged content", staged, error))?;
        sync_dir(&self.dir);
        Ok(())
    }

    /// Move the current generation to the quarantine slot.
    ///
    /// Returns `false` if there is no current generation.
    pub fn quarantine_current(&self, file: &TrackedFile) -> Result<bool, StoreError> {
        rename_if_exists(
            &self.path(file, Generation::Current),
            &self.path(file, Generation::Quarantined),
            "unable to quarantine current generation",
        )
    }

    /// Make the previous generation the current generation.
    ///
    /// Returns `false` if there is no previous generation.
    pub fn restore_previous(&self, file: &TrackedFile) -> Result<bool, StoreError> {
        rename_if_exists(
            &self.path(file, Generation::Previous),
            &self.path(file, Generation::Current),
            "unable to restore previous generation",
        )
    }

    /// Repair the generations of a file after an interrupted installation or rollback.
    ///
    /// Content left under the temporary staging name may be truncated and is always
    /// discarded. Staged content is complete. It is promoted if the current generation
    /// is missing and discarded otherwise, in which case the next fetch installs it
    /// again.
    pub fn recover(&self, file: &TrackedFile) -> Result<Recovery, StoreError> {
        let discarded_partial = remove_if_exists(&with_staged_suffix(&self.staged_path(file)))?;
        let has_staged = self.staged_path(file).exists();
        if self.exists(file, Generation::Current) {
            if has_staged {
                remove_if_exists(&self.staged_path(file))?;
                return Ok(Recovery::DiscardedStaged);
            }
        } else if has_staged {
            self.promote_staged(file)?;
            return Ok(Recovery::PromotedStaged);
        } else if self.restore_previous(file)? {
            return Ok(Recovery::RestoredPrevious);
        }
        if discarded_partial {
            Ok(Recovery::DiscardedStaged)
        } else {
            Ok(Recovery::Nothing)
        }
    }
}

/// Atomically replace the content of the file at the given path.
///
/// The content is written to a sibling file, synchronized, and renamed into place. A
/// crash leaves either the old or the new content.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let new_path = with_staged_suffix(path);
    write_synced(&new_path, content)?;
    fs::rename(&new_path, path)
        .map_err(|error| StoreError::new("unable to rename file into place", path, error))?;
    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn with_staged_suffix(path: &Path) -> PathBuf {
    let mut new_path = path.as_os_str().to_owned();
    new_path.push(STAGED_SUFFIX);
    PathBuf::from(new_path)
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => {
            if let Some(parent) = path.parent() {
                sync_dir(parent);
            }
            Ok(true)
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(StoreError::new("unable to remove file", path, error)),
    }
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut file =
        File::create(path).map_err(|error| StoreError::new("unable to create file", path, error))?;
    file.write_all(content)
        .map_err(|error| StoreError::new("unable to write file", path, error))?;
    file.sync_all()
        .map_err(|error| StoreError::new("unable to synchronize file", path, error))?;
    Ok(())
}

fn rename_if_exists(from: &Path, to: &Path, action: &'static str) -> Result<bool, StoreError> {
    match fs::rename(from, to) {
        Ok(()) => {
            if let Some(parent) = to.parent() {
                sync_dir(parent);
            }
            Ok(true)
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(StoreError::new(action, from, error)),
    }
}

/// Persist directory entries after a rename.
fn sync_dir(dir: &Path) {
    // Not every filesystem supports synchronizing directories.
    if let Err(error) = File::open(dir).and_then(|dir| dir.sync_all()) {
        trace!("unable to synchronize directory {dir:?}: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> TrackedFile {
        TrackedFile::new(name).unwrap()
    }

    #[test]
    fn test_tracked_file_names() {
        assert!(TrackedFile::new("main.py").is_ok());
        assert!(TrackedFile::new("weather_utils.py").is_ok());
        for invalid in ["", ".", "..", "lib/main.py", "main.py.prev", "main.py.bad", "x.new"] {
            assert!(TrackedFile::new(invalid).is_err(), "{invalid:?} must be rejected");
        }
    }

    #[test]
    fn test_install_rotates_previous() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");

        let installed = store.install(&main, b"v1").unwrap();
        assert!(!installed.backed_up);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v1");
        assert!(!store.exists(&main, Generation::Previous));

        let installed = store.install(&main, b"v2").unwrap();
        assert!(installed.backed_up);
        let installed = store.install(&main, b"v3").unwrap();
        assert!(installed.backed_up);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v3");
        assert_eq!(store.read(&main, Generation::Previous).unwrap().unwrap(), b"v2");
        assert!(!store.staged_path(&main).exists());
    }

    #[test]
    fn test_quarantine_and_restore() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        store.install(&main, b"v1").unwrap();
        store.install(&main, b"v2").unwrap();

        assert!(store.quarantine_current(&main).unwrap());
        assert!(store.restore_previous(&main).unwrap());
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v1");
        assert_eq!(store.read(&main, Generation::Quarantined).unwrap().unwrap(), b"v2");
        assert!(!store.restore_previous(&main).unwrap());
    }

    #[test]
    fn test_recover_promotes_completely_staged_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        store.install(&main, b"v1").unwrap();
        // Power loss between the two renames of an installation.
        store.stage(&main, b"v2").unwrap();
        store.back_up_current(&main).unwrap();
        assert!(!store.exists(&main, Generation::Current));

        assert_eq!(store.recover(&main).unwrap(), Recovery::PromotedStaged);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v2");
        assert_eq!(store.read(&main, Generation::Previous).unwrap().unwrap(), b"v1");
        assert_eq!(store.recover(&main).unwrap(), Recovery::Nothing);
    }

    #[test]
    fn test_recover_discards_stale_staged_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        store.install(&main, b"v1").unwrap();
        store.stage(&main, b"v2").unwrap();

        assert_eq!(store.recover(&main).unwrap(), Recovery::DiscardedStaged);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v1");
        assert!(!store.staged_path(&main).exists());

        // First installation interrupted after staging.
        let utils = file("weather_utils.py");
        store.stage(&utils, b"v1").unwrap();
        assert_eq!(store.recover(&utils).unwrap(), Recovery::PromotedStaged);
        assert_eq!(store.read(&utils, Generation::Current).unwrap().unwrap(), b"v1");
    }

    #[test]
    fn test_recover_never_promotes_partially_staged_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        store.install(&main, b"v1").unwrap();
        store.install(&main, b"v2").unwrap();
        assert!(!tempdir.path().join("main.py.new.new").exists());

        // Partially written staged content next to an interrupted rollback.
        fs::write(tempdir.path().join("main.py.new.new"), b"v3 (trunc").unwrap();
        store.quarantine_current(&main).unwrap();

        assert_eq!(store.recover(&main).unwrap(), Recovery::RestoredPrevious);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v1");
        assert!(!store.staged_path(&main).exists());
        assert!(!tempdir.path().join("main.py.new.new").exists());

        // Power loss while writing the staged content of the first installation.
        let utils = file("weather_utils.py");
        fs::write(tempdir.path().join("weather_utils.py.new.new"), b"v1 (tr").unwrap();
        assert_eq!(store.recover(&utils).unwrap(), Recovery::DiscardedStaged);
        assert!(!store.exists(&utils, Generation::Current));
        assert!(!store.staged_path(&utils).exists());
    }

    #[test]
    fn test_recover_restores_previous() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        store.install(&main, b"v1").unwrap();
        store.install(&main, b"v2").unwrap();
        // Power loss between the two renames of a rollback.
        store.quarantine_current(&main).unwrap();

        assert_eq!(store.recover(&main).unwrap(), Recovery::RestoredPrevious);
        assert_eq!(store.read(&main, Generation::Current).unwrap().unwrap(), b"v1");
        assert_eq!(store.read(&main, Generation::Quarantined).unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_describe() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tempdir.path());
        let main = file("main.py");
        assert_eq!(store.describe(&main, Generation::Current).unwrap(), None);
        store.install(&main, b"hello").unwrap();
        let info = store.describe(&main, Generation::Current).unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(
            info.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("counter.txt");
        write_atomic(&path, b"1").unwrap();
        write_atomic(&path, b"2").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"2");
        assert!(!tempdir.path().join("counter.txt.new").exists());
    }
}
