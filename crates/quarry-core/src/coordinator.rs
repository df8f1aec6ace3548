// crates/quarry-core/src/coordinator.rs
// ============================================================================
// Module: Execution Coordinator
// Description: Single-flight archival run over every configured table.
// Purpose: Lock, archive tables sequentially, clean up, report, unlock.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! [`Coordinator::run`] is the entry point an external scheduler calls. It
//! takes the [`ExecutionLock`] without waiting, runs the storage backend's
//! [`TableArchiver`] for each table strictly one after another, prunes old
//! archive files, and hands every per-table [`ExecutionResult`] to the audit
//! sink. The lock is released on every exit path. Archivers call back after
//! each committed batch, and every callback refreshes the lock heartbeat.
//!
//! Failure isolation:
//! - Lock contention is a normal skip, not an error.
//! - One table's failure never stops the remaining tables.
//! - A cleanup failure is reported but never marks tables as failed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::Cell;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::audit::ArchiveAuditSink;
use crate::audit::ArchiveEvent;
use crate::lock::ExecutionLock;
use crate::lock::ExecutionLockGuard;
use crate::lock::LockAcquisition;
use crate::locator::ArchiveLayout;
use crate::result::ExecutionResult;
use crate::table::TableSpec;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Storage backend capable of archiving one table.
///
/// Implementations must not panic or return errors: every failure is folded
/// into the returned [`ExecutionResult`].
pub trait TableArchiver {
    /// Archives every eligible row of `table` relative to `now`.
    ///
    /// `heartbeat` must be called after each committed unit of work so the
    /// caller can keep its execution lock fresh during long tables.
    fn archive_table_with_heartbeat(
        &self,
        table: &TableSpec,
        now: OffsetDateTime,
        heartbeat: &dyn Fn(),
    ) -> ExecutionResult;

    /// Archives `table` with no progress callback.
    fn archive_table(&self, table: &TableSpec, now: OffsetDateTime) -> ExecutionResult {
        self.archive_table_with_heartbeat(table, now, &|| {})
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Overall outcome of a coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Tables were processed (individual tables may still have failed).
    Completed,
    /// Another process holds the lock; nothing was touched.
    SkippedLockHeld,
    /// The lock could not be acquired because of a filesystem failure.
    Aborted,
}

/// Summary of one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Overall status.
    pub status: RunStatus,
    /// One result per configured table, in configuration order.
    pub results: Vec<ExecutionResult>,
    /// Archive files deleted by retention cleanup.
    pub cleaned_archives: Vec<String>,
    /// Cleanup failure, when cleanup failed.
    pub cleanup_error: Option<String>,
    /// Lock failure, when the run was aborted.
    pub lock_error: Option<String>,
}

impl RunReport {
    /// Builds a report for a run that did no work.
    const fn empty(status: RunStatus, lock_error: Option<String>) -> Self {
        Self {
            status,
            results: Vec::new(),
            cleaned_archives: Vec::new(),
            cleanup_error: None,
            lock_error,
        }
    }

    /// Returns true when the run completed and every table succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.results.iter().all(|result| result.success)
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Runs a [`TableArchiver`] over every configured table under the lock.
pub struct Coordinator<A> {
    /// Storage backend.
    archiver: A,
    /// Tables in processing order.
    tables: Vec<TableSpec>,
    /// Archive layout used for cleanup.
    layout: ArchiveLayout,
    /// Cross-process lock.
    lock: ExecutionLock,
    /// Archive files to keep; zero disables cleanup.
    retention_quarters: u32,
    /// Audit sink for events and results.
    sink: Arc<dyn ArchiveAuditSink>,
}

impl<A: TableArchiver> Coordinator<A> {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        archiver: A,
        tables: Vec<TableSpec>,
        layout: ArchiveLayout,
        lock: ExecutionLock,
        retention_quarters: u32,
        sink: Arc<dyn ArchiveAuditSink>,
    ) -> Self {
        Self {
            archiver,
            tables,
            layout,
            lock,
            retention_quarters,
            sink,
        }
    }

    /// Returns the wrapped archiver.
    pub const fn archiver(&self) -> &A {
        &self.archiver
    }

    /// Runs one archival pass at the current UTC time.
    pub fn run_now(&self) -> RunReport {
        self.run(OffsetDateTime::now_utc())
    }

    /// Runs one archival pass relative to `now`.
    pub fn run(&self, now: OffsetDateTime) -> RunReport {
        self.sink.record(
            &ArchiveEvent::info("run_started", None, "archival run started")
                .with_detail(json!({ "tables": self.tables.len() })),
        );
        let guard = match self.lock.try_acquire() {
            Ok(LockAcquisition::Acquired(guard)) => guard,
            Ok(LockAcquisition::Contended {
                holder_pid,
                age,
            }) => {
                self.sink.record(
                    &ArchiveEvent::info(
                        "lock_contended",
                        None,
                        "execution lock held by another process; skipping run",
                    )
                    .with_detail(json!({ "holder_pid": holder_pid, "age_secs": age.as_secs() })),
                );
                return RunReport::empty(RunStatus::SkippedLockHeld, None);
            }
            Err(err) => {
                self.sink.record(&ArchiveEvent::error(
                    "lock_failed",
                    None,
                    format!("failed to acquire execution lock: {err}"),
                ));
                return RunReport::empty(RunStatus::Aborted, Some(err.to_string()));
            }
        };
        if guard.reclaimed_stale() {
            self.sink.record(&ArchiveEvent::warn(
                "lock_reclaimed",
                None,
                "reclaimed a stale execution lock",
            ));
        }
        let report = self.run_locked(&guard, now);
        if let Err(err) = guard.release() {
            self.sink.record(&ArchiveEvent::warn(
                "lock_release_failed",
                None,
                format!("failed to release execution lock: {err}"),
            ));
        }
        report
    }

    /// Body of a run while the lock is held.
    fn run_locked(&self, guard: &ExecutionLockGuard, now: OffsetDateTime) -> RunReport {
        let mut results = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let refresh_failed = Cell::new(false);
            let heartbeat = || {
                if let Err(err) = guard.refresh()
                    && !refresh_failed.replace(true)
                {
                    self.sink.record(&ArchiveEvent::warn(
                        "lock_refresh_failed",
                        Some(table.name.as_str()),
                        format!("failed to refresh execution lock: {err}"),
                    ));
                }
            };
            heartbeat();
            let result = self.archiver.archive_table_with_heartbeat(table, now, &heartbeat);
            self.sink.record_result(&result);
            results.push(result);
        }
        let (cleaned_archives, cleanup_error) =
            prune_archives(&self.layout, self.retention_quarters, self.sink.as_ref());
        let failed = results.iter().filter(|result| !result.success).count();
        let archived: u64 = results.iter().map(|result| result.archived_count).sum();
        self.sink.record(
            &ArchiveEvent::info("run_finished", None, "archival run finished")
                .with_detail(json!({ "archived": archived, "failed_tables": failed })),
        );
        RunReport {
            status: RunStatus::Completed,
            results,
            cleaned_archives,
            cleanup_error,
            lock_error: None,
        }
    }
}

// ============================================================================
// SECTION: Cleanup
// ============================================================================

/// Deletes archives beyond `retention_quarters`, logging the outcome.
///
/// Returns the deleted file names and the cleanup failure, if any. A failure
/// is reported, never raised, so it cannot affect table results.
pub fn prune_archives(
    layout: &ArchiveLayout,
    retention_quarters: u32,
    sink: &dyn ArchiveAuditSink,
) -> (Vec<String>, Option<String>) {
    match layout.cleanup_old_archives(retention_quarters) {
        Ok(deleted) => {
            if !deleted.is_empty() {
                sink.record(
                    &ArchiveEvent::info(
                        "cleanup_deleted",
                        None,
                        format!("deleted {} archive file(s)", deleted.len()),
                    )
                    .with_detail(json!({ "files": deleted })),
                );
            }
            (deleted, None)
        }
        Err(err) => {
            sink.record(&ArchiveEvent::error(
                "cleanup_failed",
                None,
                format!("archive cleanup failed: {err}"),
            ));
            (Vec::new(), Some(err.to_string()))
        }
    }
}
