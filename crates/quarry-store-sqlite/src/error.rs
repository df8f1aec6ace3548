// crates/quarry-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Archive Errors
// Description: Error taxonomy for schema sync and batch moves.
// Purpose: Classify failures so table runs can report them precisely.
// Dependencies: quarry-core, rusqlite, thiserror
// ============================================================================

//! ## Overview
//! Every failure inside a table run is converted into an
//! [`ArchiveStoreError`] and from there into the table's failure result.
//! Statement interrupts raised by the batch deadline are classified as
//! [`ArchiveStoreError::Timeout`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use quarry_core::IdentifierError;
use quarry_core::LocatorError;
use quarry_core::QuarterError;
use rusqlite::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` archive store errors.
#[derive(Debug, Error)]
pub enum ArchiveStoreError {
    /// Filesystem failure.
    #[error("archive store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("archive store db error: {0}")]
    Db(String),
    /// Archive table creation or additive alignment failed.
    #[error("archive schema sync failed: {0}")]
    Schema(String),
    /// Affected-row count did not match the selected batch.
    #[error(
        "batch integrity violation on {table} during {stage}: expected {expected} rows, got \
         {actual}"
    )]
    BatchIntegrity {
        /// Table being archived.
        table: String,
        /// Statement that mismatched (`insert` or `delete`).
        stage: &'static str,
        /// Rows selected for the batch.
        expected: usize,
        /// Rows reported affected by the engine.
        actual: usize,
    },
    /// A batch exceeded its transaction deadline.
    #[error("archive batch timed out: {0}")]
    Timeout(String),
    /// Invalid configuration or stored data.
    #[error("archive store invalid data: {0}")]
    Invalid(String),
}

impl From<QuarterError> for ArchiveStoreError {
    fn from(error: QuarterError) -> Self {
        Self::Invalid(error.to_string())
    }
}

impl From<LocatorError> for ArchiveStoreError {
    fn from(error: LocatorError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<IdentifierError> for ArchiveStoreError {
    fn from(error: IdentifierError) -> Self {
        Self::Invalid(error.to_string())
    }
}

/// Converts a rusqlite error, classifying deadline interrupts.
pub(crate) fn db_error(error: rusqlite::Error) -> ArchiveStoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error
        && failure.code == ErrorCode::OperationInterrupted
    {
        return ArchiveStoreError::Timeout(error.to_string());
    }
    ArchiveStoreError::Db(error.to_string())
}
