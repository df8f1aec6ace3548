// crates/quarry-core/src/result.rs
// ============================================================================
// Module: Execution Results
// Description: Immutable per-table outcome of one archival run.
// Purpose: Accumulate batch progress and freeze it into a result record.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A table run never returns an error to its caller. Instead progress is
//! collected in a [`ResultAccumulator`] and frozen into an
//! [`ExecutionResult`], which carries the failure message when the run was
//! aborted. Batches committed before the failure remain counted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of archiving one table during one run.
///
/// # Invariants
/// - `error_message` is `Some` exactly when `success` is false.
/// - `target_archive_dbs` lists each store name once, in first-touch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Source table name.
    pub table_name: String,
    /// Whether every eligible window was archived.
    pub success: bool,
    /// Rows moved into archive stores.
    pub archived_count: u64,
    /// Oldest time value moved (RFC 3339), when any row moved.
    pub data_range_start: Option<String>,
    /// Newest time value moved (RFC 3339), when any row moved.
    pub data_range_end: Option<String>,
    /// Archive store names that received rows or were provisioned.
    pub target_archive_dbs: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Failure description for aborted runs.
    pub error_message: Option<String>,
}

/// Mutable progress of an in-flight table run.
#[derive(Debug, Clone, Default)]
pub struct ResultAccumulator {
    /// Rows moved so far.
    archived_count: u64,
    /// Oldest time value moved so far.
    earliest: Option<OffsetDateTime>,
    /// Newest time value moved so far.
    latest: Option<OffsetDateTime>,
    /// Archive store names touched so far.
    targets: Vec<String>,
}

impl ResultAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a committed batch.
    pub fn observe_batch(
        &mut self,
        moved: u64,
        earliest: Option<OffsetDateTime>,
        latest: Option<OffsetDateTime>,
    ) {
        self.archived_count = self.archived_count.saturating_add(moved);
        if let Some(value) = earliest {
            self.earliest = Some(self.earliest.map_or(value, |current| current.min(value)));
        }
        if let Some(value) = latest {
            self.latest = Some(self.latest.map_or(value, |current| current.max(value)));
        }
    }

    /// Records an archive store touched by the run.
    pub fn touch_target(&mut self, store_name: &str) {
        if !self.targets.iter().any(|existing| existing == store_name) {
            self.targets.push(store_name.to_string());
        }
    }

    /// Returns the rows moved so far.
    #[must_use]
    pub const fn archived_count(&self) -> u64 {
        self.archived_count
    }

    /// Freezes the accumulator into a successful result.
    #[must_use]
    pub fn succeed(self, table_name: &str, elapsed: Duration) -> ExecutionResult {
        self.finish(table_name, elapsed, None)
    }

    /// Freezes the accumulator into a failed result.
    #[must_use]
    pub fn fail(self, table_name: &str, elapsed: Duration, message: String) -> ExecutionResult {
        self.finish(table_name, elapsed, Some(message))
    }

    /// Builds the final record.
    fn finish(
        self,
        table_name: &str,
        elapsed: Duration,
        error_message: Option<String>,
    ) -> ExecutionResult {
        ExecutionResult {
            table_name: table_name.to_string(),
            success: error_message.is_none(),
            archived_count: self.archived_count,
            data_range_start: self.earliest.and_then(|value| value.format(&Rfc3339).ok()),
            data_range_end: self.latest.and_then(|value| value.format(&Rfc3339).ok()),
            target_archive_dbs: self.targets,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error_message,
        }
    }
}
