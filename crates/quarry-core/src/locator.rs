// crates/quarry-core/src/locator.rs
// ============================================================================
// Module: Archive Store Locator
// Description: Deterministic archive file naming and retention cleanup.
// Purpose: Map quarter keys to archive files and prune the oldest ones.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Archive stores live flat inside one directory and are named
//! `archive_<year>_Q<n>.sqlite`. Naming is a pure function of the
//! [`QuarterKey`], so two runs always agree on where a quarter lives.
//! Cleanup is the only destructive operation and is disabled when the
//! retention quarter count is zero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::quarter::QuarterKey;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix shared by every archive store name.
pub const ARCHIVE_STORE_PREFIX: &str = "archive_";
/// File extension of archive stores (without the dot).
pub const ARCHIVE_FILE_EXTENSION: &str = "sqlite";
/// `SQLite` sidecar suffixes removed together with an archive file.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Archive layout errors.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// Filesystem failure while listing or deleting archives.
    #[error("archive layout io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Layout
// ============================================================================

/// Archive directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Directory holding every archive store.
    directory: PathBuf,
}

impl ArchiveLayout {
    /// Creates a layout rooted at `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Returns the archive directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the logical store name for a quarter (`archive_2025_Q1`).
    #[must_use]
    pub fn store_name(key: QuarterKey) -> String {
        format!("{ARCHIVE_STORE_PREFIX}{key}")
    }

    /// Returns the archive file name for a quarter (`archive_2025_Q1.sqlite`).
    #[must_use]
    pub fn file_name(key: QuarterKey) -> String {
        format!("{}.{ARCHIVE_FILE_EXTENSION}", Self::store_name(key))
    }

    /// Returns the full archive path for a quarter.
    #[must_use]
    pub fn archive_path(&self, key: QuarterKey) -> PathBuf {
        self.directory.join(Self::file_name(key))
    }

    /// Creates the archive directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Io`] when the directory cannot be created.
    pub fn ensure_directory(&self) -> Result<(), LocatorError> {
        fs::create_dir_all(&self.directory).map_err(|err| {
            LocatorError::Io(format!("create {}: {err}", self.directory.display()))
        })
    }

    /// Lists the quarters that have an archive file, newest first.
    ///
    /// A missing directory is reported as an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Io`] when the directory cannot be read.
    pub fn list_archives(&self) -> Result<Vec<QuarterKey>, LocatorError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(LocatorError::Io(format!(
                    "read {}: {err}",
                    self.directory.display()
                )));
            }
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| LocatorError::Io(err.to_string()))?;
            let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(parse_archive_file_name) {
                keys.push(key);
            }
        }
        keys.sort_unstable_by(|left, right| right.cmp(left));
        Ok(keys)
    }

    /// Deletes every archive beyond the newest `retention_quarters`.
    ///
    /// Returns the deleted file names, oldest first. A retention of zero
    /// disables cleanup and deletes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Io`] when listing or deletion fails.
    pub fn cleanup_old_archives(&self, retention_quarters: u32) -> Result<Vec<String>, LocatorError> {
        if retention_quarters == 0 {
            return Ok(Vec::new());
        }
        let keep = usize::try_from(retention_quarters).unwrap_or(usize::MAX);
        let keys = self.list_archives()?;
        let mut deleted = Vec::new();
        for key in keys.into_iter().skip(keep) {
            let path = self.archive_path(key);
            fs::remove_file(&path)
                .map_err(|err| LocatorError::Io(format!("remove {}: {err}", path.display())))?;
            remove_sidecars(&path)?;
            deleted.push(Self::file_name(key));
        }
        deleted.reverse();
        Ok(deleted)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses an archive file name back into its quarter key.
#[must_use]
pub fn parse_archive_file_name(name: &str) -> Option<QuarterKey> {
    let stem = name.strip_prefix(ARCHIVE_STORE_PREFIX)?;
    let key = stem.strip_suffix(ARCHIVE_FILE_EXTENSION)?.strip_suffix('.')?;
    key.parse().ok()
}

/// Removes `SQLite` sidecar files left next to a deleted archive.
fn remove_sidecars(path: &Path) -> Result<(), LocatorError> {
    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = path.as_os_str().to_os_string();
        sidecar.push(suffix);
        match fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(LocatorError::Io(format!(
                    "remove {}: {err}",
                    Path::new(&sidecar).display()
                )));
            }
        }
    }
    Ok(())
}
