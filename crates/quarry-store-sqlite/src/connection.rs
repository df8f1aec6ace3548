// crates/quarry-store-sqlite/src/connection.rs
// ============================================================================
// Module: SQLite Connections
// Description: Connection configuration and pragmas for source and archives.
// Purpose: Open source and archive databases with consistent durability.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! Two kinds of connections exist. The *source* connection reads the hot
//! database (bounds queries, schema introspection) and must point at an
//! existing file. *Transfer* connections open an archive file as `main` and
//! attach the source for the duration of one batch.
//!
//! Archive files are always opened in WAL mode. With the archive as `main`,
//! `SQLite` commits the archive side of a cross-file transaction before the
//! attached source side, so a crash between the two file commits can leave a
//! duplicate (repaired by the engine on the next run) but never a lost row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Deserialize;

use crate::error::ArchiveStoreError;
use crate::error::db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the hot source database.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the source `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds, applied to source and transfer connections.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode of the source database.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode, applied to source and archive databases.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config with default durability settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Open
// ============================================================================

/// Opens the existing source database.
pub(crate) fn open_source_connection(
    config: &SqliteStoreConfig,
) -> Result<Connection, ArchiveStoreError> {
    validate_store_path(&config.path)?;
    if !config.path.is_file() {
        return Err(ArchiveStoreError::Invalid(format!(
            "source database not found: {}",
            config.path.display()
        )));
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config.journal_mode, true, config)?;
    Ok(connection)
}

/// Opens (creating when needed) an archive database as `main`.
pub(crate) fn open_archive_connection(
    path: &Path,
    config: &SqliteStoreConfig,
) -> Result<Connection, ArchiveStoreError> {
    validate_store_path(path)?;
    ensure_parent_dir(path)?;
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(path, flags).map_err(db_error)?;
    // Cascading deletes on the attached source would remove rows that were
    // never archived.
    apply_pragmas(&connection, SqliteStoreMode::Wal, false, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    journal_mode: SqliteStoreMode,
    foreign_keys: bool,
    config: &SqliteStoreConfig,
) -> Result<(), ArchiveStoreError> {
    let foreign_keys = if foreign_keys { "ON" } else { "OFF" };
    connection.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};")).map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for a store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), ArchiveStoreError> {
    let Some(parent) = path.parent() else {
        return Err(ArchiveStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| ArchiveStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
pub(crate) fn validate_store_path(path: &Path) -> Result<(), ArchiveStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ArchiveStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ArchiveStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(ArchiveStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}
