// crates/quarry-core/src/table.rs
// ============================================================================
// Module: Table Specifications
// Description: Validated identifiers and per-table archival settings.
// Purpose: Gate every SQL identifier behind a closed, validated allow-list.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Table and column names are the only values Quarry interpolates into SQL
//! text. They reach the engine exclusively through [`Identifier`], which
//! accepts plain ASCII identifiers, and table names are additionally checked
//! against the [`TableAllowList`] built from configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum identifier length accepted for tables and columns.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifier is empty or too long.
    #[error("identifier length must be 1-{MAX_IDENTIFIER_LENGTH}: {0}")]
    Length(String),
    /// Identifier contains characters outside `[A-Za-z0-9_]` or starts with a digit.
    #[error("identifier contains invalid characters: {0}")]
    Characters(String),
    /// Identifier uses the reserved `sqlite_` prefix.
    #[error("identifier uses a reserved prefix: {0}")]
    Reserved(String),
    /// Table is not part of the configured allow-list.
    #[error("table is not allow-listed: {0}")]
    NotAllowed(String),
}

// ============================================================================
// SECTION: Identifier
// ============================================================================

/// Validated SQL identifier (table or column name).
///
/// # Invariants
/// - Matches `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_IDENTIFIER_LENGTH`] bytes.
/// - Never starts with `sqlite_` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validates and wraps an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the name is not a plain identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_IDENTIFIER_LENGTH {
            return Err(IdentifierError::Length(value));
        }
        let mut bytes = value.bytes();
        let head_ok = bytes.next().is_some_and(|byte| byte.is_ascii_alphabetic() || byte == b'_');
        if !head_ok || !bytes.all(|byte| byte.is_ascii_alphanumeric() || byte == b'_') {
            return Err(IdentifierError::Characters(value));
        }
        if value.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(IdentifierError::Reserved(value));
        }
        Ok(Self(value))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier double-quoted for SQL interpolation.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Double-quotes an identifier, escaping embedded quotes.
///
/// Used for column names read back from schema introspection, which may
/// legitimately fall outside the [`Identifier`] character set.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// SECTION: Table Spec
// ============================================================================

/// Representation of a source table's designated time field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeFieldKind {
    /// Integer seconds since the Unix epoch.
    #[default]
    EpochSeconds,
    /// Integer milliseconds since the Unix epoch.
    EpochMillis,
    /// Date or date-time text, normalized to `YYYY-MM-DD HH:MM:SS` UTC.
    Text,
}

impl TimeFieldKind {
    /// Returns a stable label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EpochSeconds => "epoch_seconds",
            Self::EpochMillis => "epoch_millis",
            Self::Text => "text",
        }
    }
}

/// Archival settings for one logical source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    /// Source (and archive) table name.
    pub name: Identifier,
    /// Column holding the row's time value.
    pub time_field: Identifier,
    /// Encoding of the time column.
    pub time_kind: TimeFieldKind,
    /// Single-column primary key used to address rows in a batch.
    pub primary_key: Identifier,
    /// Retention in calendar months; invalid values fall back to the default.
    pub retention_months: i64,
}

// ============================================================================
// SECTION: Allow-List
// ============================================================================

/// Closed set of table names the engine may interpolate into SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableAllowList {
    /// Allowed table names.
    names: BTreeSet<Identifier>,
}

impl TableAllowList {
    /// Builds the allow-list from configured table specs.
    #[must_use]
    pub fn from_specs(specs: &[TableSpec]) -> Self {
        Self {
            names: specs.iter().map(|spec| spec.name.clone()).collect(),
        }
    }

    /// Returns true when `name` is allow-listed.
    #[must_use]
    pub fn contains(&self, name: &Identifier) -> bool {
        self.names.contains(name)
    }

    /// Checks that `name` is allow-listed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::NotAllowed`] for unknown tables.
    pub fn check(&self, name: &Identifier) -> Result<(), IdentifierError> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(IdentifierError::NotAllowed(name.to_string()))
        }
    }
}
