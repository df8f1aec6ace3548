// crates/quarry-config/src/config.rs
// ============================================================================
// Module: Quarry Configuration
// Description: Configuration loading and validation for Quarry.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: quarry-core, quarry-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Structural problems (no tables, duplicate tables, empty paths, a file log
//! sink without a path) fail closed. Numeric tuning knobs are passed through
//! unchanged; the engine replaces out-of-range values with its defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quarry_core::ArchiveAuditSink;
use quarry_core::ArchiveLayout;
use quarry_core::DEFAULT_LOCK_STALE_AFTER;
use quarry_core::DEFAULT_RETENTION_MONTHS;
use quarry_core::ExecutionLock;
use quarry_core::FileAuditSink;
use quarry_core::Identifier;
use quarry_core::NoopAuditSink;
use quarry_core::StderrAuditSink;
use quarry_core::TableSpec;
use quarry_core::TimeFieldKind;
use quarry_store_sqlite::DEFAULT_BATCH_DELAY;
use quarry_store_sqlite::DEFAULT_BATCH_SIZE;
use quarry_store_sqlite::DEFAULT_BATCH_TIMEOUT;
use quarry_store_sqlite::EngineSettings;
use quarry_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "quarry.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "QUARRY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured tables.
pub(crate) const MAX_TABLES: usize = 256;
/// Default archive directory.
const DEFAULT_ARCHIVE_DIRECTORY: &str = "data/archive";
/// Lock target created inside the archive directory when no lock path is set.
const DEFAULT_LOCK_FILE_NAME: &str = ".quarry-run";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Quarry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuarryConfig {
    /// Hot source database.
    pub source: SqliteStoreConfig,
    /// Archive directory, cleanup, and batch tuning.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Execution lock configuration.
    #[serde(default)]
    pub lock: LockConfig,
    /// Log sink configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// Tables to archive, in processing order.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl QuarryConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then `QUARRY_CONFIG`, then
    /// `quarry.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("source.path", &self.source.path.to_string_lossy())?;
        self.archive.validate()?;
        self.lock.validate()?;
        self.log.validate()?;
        if self.tables.is_empty() {
            return Err(ConfigError::Invalid("at least one [[tables]] entry is required".to_string()));
        }
        if self.tables.len() > MAX_TABLES {
            return Err(ConfigError::Invalid(format!("too many tables (max {MAX_TABLES})")));
        }
        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate table: {}", table.name)));
            }
        }
        Ok(())
    }

    /// Returns the configured tables as engine table specs.
    #[must_use]
    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.tables.iter().map(TableConfig::to_spec).collect()
    }

    /// Returns the batch tuning passed to the engine.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            batch_size: self.archive.batch_size,
            batch_delay: Duration::from_millis(self.archive.batch_delay_ms),
            batch_timeout: Duration::from_millis(self.archive.batch_timeout_ms),
        }
    }

    /// Returns the archive directory layout.
    #[must_use]
    pub fn archive_layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.archive.directory)
    }

    /// Returns the lock target path (`<archive>/.quarry-run` by default).
    #[must_use]
    pub fn lock_target(&self) -> PathBuf {
        self.lock
            .path
            .clone()
            .unwrap_or_else(|| self.archive.directory.join(DEFAULT_LOCK_FILE_NAME))
    }

    /// Returns the execution lock.
    ///
    /// A zero staleness timeout falls back to one hour.
    #[must_use]
    pub fn execution_lock(&self) -> ExecutionLock {
        let stale_after = match self.lock.stale_after_secs {
            0 => DEFAULT_LOCK_STALE_AFTER,
            secs => Duration::from_secs(secs),
        };
        ExecutionLock::new(self.lock_target(), stale_after)
    }

    /// Builds the configured audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the log file cannot be opened.
    pub fn build_sink(&self) -> Result<Arc<dyn ArchiveAuditSink>, ConfigError> {
        match self.log.sink {
            LogSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
            LogSinkKind::None => Ok(Arc::new(NoopAuditSink)),
            LogSinkKind::File => {
                let path = self.log.path.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("log.path is required for the file sink".to_string())
                })?;
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)
                        .map_err(|err| ConfigError::Io(format!("{}: {err}", parent.display())))?;
                }
                let sink = FileAuditSink::new(path)
                    .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
                Ok(Arc::new(sink))
            }
        }
    }
}

/// Archive directory, cleanup, and batch tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding one archive file per quarter.
    #[serde(default = "default_archive_directory")]
    pub directory: PathBuf,
    /// Archive files kept by cleanup; zero disables cleanup.
    #[serde(default)]
    pub retention_quarters: u32,
    /// Rows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause after each non-empty batch, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Deadline for one batch transaction, in milliseconds.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: default_archive_directory(),
            retention_quarters: 0,
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl ArchiveConfig {
    /// Validates archive configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("archive.directory", &self.directory.to_string_lossy())
    }
}

/// Execution lock configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Lock target file; the lock itself is `<path>.lock`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Heartbeat age after which a holder is presumed dead, in seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: None,
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl LockConfig {
    /// Validates lock configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => validate_path_string("lock.path", &path.to_string_lossy()),
            None => Ok(()),
        }
    }
}

/// Log sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `log.path`.
    File,
    /// Discard events.
    None,
}

/// Log sink configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LogConfig {
    /// Validates log configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.sink, &self.path) {
            (LogSinkKind::File, None) => {
                Err(ConfigError::Invalid("log.path is required when log.sink = \"file\"".to_string()))
            }
            (_, Some(path)) => validate_path_string("log.path", &path.to_string_lossy()),
            (_, None) => Ok(()),
        }
    }
}

/// One `[[tables]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Source table name.
    pub name: Identifier,
    /// Column holding the row's time value.
    pub time_field: Identifier,
    /// Encoding of the time column.
    #[serde(default)]
    pub time_kind: TimeFieldKind,
    /// Single-column primary key.
    pub primary_key: Identifier,
    /// Retention in calendar months; unusable values fall back to six.
    #[serde(default = "default_retention_months")]
    pub retention_months: i64,
}

impl TableConfig {
    /// Converts the entry into a table spec.
    fn to_spec(&self) -> TableSpec {
        TableSpec {
            name: self.name.clone(),
            time_field: self.time_field.clone(),
            time_kind: self.time_kind,
            primary_key: self.primary_key.clone(),
            retention_months: self.retention_months,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default archive directory.
fn default_archive_directory() -> PathBuf {
    PathBuf::from(DEFAULT_ARCHIVE_DIRECTORY)
}

/// Default batch size.
const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Default batch delay (ms).
fn default_batch_delay_ms() -> u64 {
    u64::try_from(DEFAULT_BATCH_DELAY.as_millis()).unwrap_or(u64::MAX)
}

/// Default batch timeout (ms).
fn default_batch_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_BATCH_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

/// Default lock staleness (seconds).
const fn default_stale_after_secs() -> u64 {
    DEFAULT_LOCK_STALE_AFTER.as_secs()
}

/// Default retention months.
fn default_retention_months() -> i64 {
    i64::from(DEFAULT_RETENTION_MONTHS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
