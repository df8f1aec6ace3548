// crates/quarry-store-sqlite/src/engine.rs
// ============================================================================
// Module: SQLite Archive Engine
// Description: Moves aged rows from source tables into quarterly archives.
// Purpose: Implement the table archiver with verified, bounded batches.
// Dependencies: quarry-core, rusqlite, serde, serde_json, time
// ============================================================================

//! ## Overview
//! For each table the engine computes the retention cutoff, splits the
//! eligible span into quarter windows, and drains each window into its
//! archive file batch by batch. Every batch is one `IMMEDIATE` transaction on
//! a transfer connection whose `main` schema is the archive file and which
//! has the source database attached as `source`:
//!
//! 1. select up to `batch_size` primary keys in the window, ordered by key;
//! 2. `INSERT INTO main.t ... SELECT ... FROM source.t` for those keys;
//! 3. `DELETE FROM source.t` for those keys;
//! 4. commit, then detach and pause for `batch_delay`.
//!
//! Both statements must report exactly the selected row count or the batch
//! is rolled back and the table run aborts. A batch still running after
//! `batch_timeout` is interrupted and rolled back.
//!
//! Cross-file commits are not atomic once a WAL database takes part; the
//! archive schema commits first, so an interrupted commit leaves duplicates.
//! The next pass over the same window removes them from the source in
//! `batch_size` chunks, each under the same deadline as a batch.
//!
//! Text time values are written to the archive in canonical UTC form. Text
//! rows whose time value cannot be read are never moved; each run counts
//! them and reports a `time_value_unreadable` warning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use quarry_core::ArchiveAuditSink;
use quarry_core::ArchiveEvent;
use quarry_core::ArchiveLayout;
use quarry_core::ExecutionResult;
use quarry_core::QuarterRange;
use quarry_core::ResultAccumulator;
use quarry_core::TableAllowList;
use quarry_core::TableArchiver;
use quarry_core::TableSpec;
use quarry_core::quarter::effective_retention_months;
use quarry_core::quarter_windows;
use quarry_core::retention_cutoff;
use quarry_core::table::quote_identifier;
use rusqlite::Connection;
use rusqlite::InterruptHandle;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::connection::SqliteStoreConfig;
use crate::connection::open_archive_connection;
use crate::connection::open_source_connection;
use crate::error::ArchiveStoreError;
use crate::error::db_error;
use crate::schema::ColumnInfo;
use crate::schema::SchemaSynchronizer;
use crate::schema::read_source_columns;
use crate::time_field::decode_time;
use crate::time_field::time_bound;
use crate::time_field::time_comparison_expression;
use crate::time_field::time_storage_expression;
use crate::time_field::time_value_expression;
use crate::time_field::unreadable_time_predicate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 800;
/// Maximum rows per batch (bounded by `SQLite`'s bound-parameter limit).
pub const MAX_BATCH_SIZE: usize = 900;
/// Default pause after each non-empty batch.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);
/// Maximum accepted pause between batches.
pub const MAX_BATCH_DELAY: Duration = Duration::from_secs(10);
/// Default deadline for one batch transaction.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Schema alias under which the source database is attached.
const SOURCE_SCHEMA: &str = "source";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Batch tuning for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Rows per batch (`1..=MAX_BATCH_SIZE`).
    pub batch_size: usize,
    /// Pause after each non-empty batch.
    pub batch_delay: Duration,
    /// Deadline for one batch transaction.
    pub batch_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

impl EngineSettings {
    /// Replaces unusable values with defaults.
    ///
    /// A zero batch size or timeout and an over-long delay fall back to their
    /// defaults; an oversized batch is capped at [`MAX_BATCH_SIZE`].
    #[must_use]
    pub fn sanitized(self) -> Self {
        let batch_size = match self.batch_size {
            0 => DEFAULT_BATCH_SIZE,
            size => size.min(MAX_BATCH_SIZE),
        };
        let batch_delay =
            if self.batch_delay > MAX_BATCH_DELAY { DEFAULT_BATCH_DELAY } else { self.batch_delay };
        let batch_timeout =
            if self.batch_timeout.is_zero() { DEFAULT_BATCH_TIMEOUT } else { self.batch_timeout };
        Self {
            batch_size,
            batch_delay,
            batch_timeout,
        }
    }
}

/// Result of one committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Rows moved (zero when the window is drained).
    pub moved: usize,
    /// Oldest time value in the batch.
    pub earliest: Option<OffsetDateTime>,
    /// Newest time value in the batch.
    pub latest: Option<OffsetDateTime>,
}

/// Dry-run view of what a table run would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePlan {
    /// Source table name.
    pub table: String,
    /// Retention months actually applied.
    pub retention_months: u32,
    /// Rows with a time value at or after this instant stay in the source.
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff: OffsetDateTime,
    /// Rows currently below the cutoff.
    pub eligible_rows: u64,
    /// Rows whose text time value cannot be read; these never move.
    pub unreadable_rows: u64,
    /// Quarter windows that would be drained.
    pub ranges: Vec<QuarterRange>,
    /// Archive store names the windows map to.
    pub target_archive_dbs: Vec<String>,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// `SQLite` implementation of [`TableArchiver`].
pub struct SqliteArchiveEngine {
    /// Source database configuration.
    source_config: SqliteStoreConfig,
    /// Dedicated source connection for bounds queries.
    source: Mutex<Connection>,
    /// Archive file layout.
    layout: ArchiveLayout,
    /// Configured tables.
    tables: Vec<TableSpec>,
    /// Closed set of table names.
    allow_list: TableAllowList,
    /// Archive schema alignment.
    synchronizer: SchemaSynchronizer,
    /// Batch tuning (sanitized).
    settings: EngineSettings,
    /// Audit sink.
    sink: Arc<dyn ArchiveAuditSink>,
}

impl SqliteArchiveEngine {
    /// Opens the source database and prepares the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the source cannot be opened or no
    /// tables are configured.
    pub fn open(
        source_config: SqliteStoreConfig,
        layout: ArchiveLayout,
        tables: Vec<TableSpec>,
        settings: EngineSettings,
        sink: Arc<dyn ArchiveAuditSink>,
    ) -> Result<Self, ArchiveStoreError> {
        if tables.is_empty() {
            return Err(ArchiveStoreError::Invalid("no tables configured".to_string()));
        }
        let connection = open_source_connection(&source_config)?;
        let allow_list = TableAllowList::from_specs(&tables);
        let synchronizer = SchemaSynchronizer::new(allow_list.clone(), Arc::clone(&sink));
        Ok(Self {
            source_config,
            source: Mutex::new(connection),
            layout,
            tables,
            allow_list,
            synchronizer,
            settings: settings.sanitized(),
            sink,
        })
    }

    /// Returns the configured tables.
    #[must_use]
    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Returns the archive layout.
    #[must_use]
    pub const fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Returns the effective batch settings.
    #[must_use]
    pub const fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Computes the quarter windows holding rows older than the cutoff.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the bounds query fails.
    pub fn eligible_ranges(
        &self,
        table: &TableSpec,
        now: OffsetDateTime,
    ) -> Result<Vec<QuarterRange>, ArchiveStoreError> {
        self.allow_list.check(&table.name)?;
        let cutoff = retention_cutoff(now, table.retention_months)?;
        let column = table.time_field.quoted();
        let comparison = time_comparison_expression(table.time_kind, &column);
        let value = time_value_expression(table.time_kind, &column);
        let sql = format!(
            "SELECT MIN({value}), MAX({value}) FROM {} WHERE {comparison} < ?1",
            table.name.quoted()
        );
        let bound = time_bound(table.time_kind, cutoff)?;
        let (min, max) = {
            let guard = self
                .source
                .lock()
                .map_err(|_| ArchiveStoreError::Db("source connection mutex poisoned".to_string()))?;
            guard
                .query_row(&sql, [bound], |row| {
                    Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
                })
                .map_err(db_error)?
        };
        let earliest = decode_time(table.time_kind, &min)?;
        let latest = decode_time(table.time_kind, &max)?;
        match (earliest, latest) {
            (Some(earliest), Some(latest)) => Ok(quarter_windows(earliest, latest, cutoff)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Describes the work a run would do for `table` without moving rows.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the source cannot be queried.
    pub fn plan_table(
        &self,
        table: &TableSpec,
        now: OffsetDateTime,
    ) -> Result<TablePlan, ArchiveStoreError> {
        let ranges = self.eligible_ranges(table, now)?;
        let cutoff = retention_cutoff(now, table.retention_months)?;
        let comparison = time_comparison_expression(table.time_kind, &table.time_field.quoted());
        let sql =
            format!("SELECT COUNT(*) FROM {} WHERE {comparison} < ?1", table.name.quoted());
        let bound = time_bound(table.time_kind, cutoff)?;
        let eligible_rows = self.count_source_rows(&sql, &[bound])?;
        let unreadable_rows = self.count_unreadable(table)?;
        let target_archive_dbs =
            ranges.iter().map(|range| ArchiveLayout::store_name(range.quarter)).collect();
        Ok(TablePlan {
            table: table.name.to_string(),
            retention_months: effective_retention_months(table.retention_months),
            cutoff,
            eligible_rows,
            unreadable_rows,
            ranges,
            target_archive_dbs,
        })
    }

    /// Counts rows whose time value no window comparison can read.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the source cannot be queried.
    pub fn count_unreadable(&self, table: &TableSpec) -> Result<u64, ArchiveStoreError> {
        self.allow_list.check(&table.name)?;
        let Some(predicate) =
            unreadable_time_predicate(table.time_kind, &table.time_field.quoted())
        else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {predicate}", table.name.quoted());
        self.count_source_rows(&sql, &[])
    }

    /// Runs a `COUNT(*)` query on the source connection.
    fn count_source_rows(&self, sql: &str, bounds: &[Value]) -> Result<u64, ArchiveStoreError> {
        let count: i64 = {
            let guard = self
                .source
                .lock()
                .map_err(|_| ArchiveStoreError::Db("source connection mutex poisoned".to_string()))?;
            guard
                .query_row(sql, params_from_iter(bounds.iter()), |row| row.get(0))
                .map_err(db_error)?
        };
        u64::try_from(count)
            .map_err(|_| ArchiveStoreError::Invalid(format!("negative row count: {count}")))
    }

    /// Provisions `table` in the archive at `archive_path` and moves one
    /// batch of rows in `window` into it.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the batch fails; the batch is then
    /// rolled back.
    pub fn move_batch(
        &self,
        table: &TableSpec,
        window: &QuarterRange,
        archive_path: &Path,
    ) -> Result<BatchOutcome, ArchiveStoreError> {
        self.allow_list.check(&table.name)?;
        let transfer = open_archive_connection(archive_path, &self.source_config)?;
        let attached = AttachedSource::attach(&transfer, &self.source_config)?;
        let columns = read_source_columns(&transfer, SOURCE_SCHEMA, &table.name)?;
        self.synchronizer.ensure_table(&transfer, &table.name, &columns)?;
        attached.detach()?;
        self.move_batch_on(&transfer, table, window)
    }

    /// Archives one table; every error becomes part of `progress`' outcome.
    fn run_table(
        &self,
        table: &TableSpec,
        now: OffsetDateTime,
        progress: &mut ResultAccumulator,
        heartbeat: &dyn Fn(),
    ) -> Result<(), ArchiveStoreError> {
        let unreadable = self.count_unreadable(table)?;
        if unreadable > 0 {
            self.sink.record(
                &ArchiveEvent::warn(
                    "time_value_unreadable",
                    Some(table.name.as_str()),
                    format!("{unreadable} row(s) have an unreadable time value and were skipped"),
                )
                .with_detail(json!({ "rows": unreadable, "time_field": table.time_field })),
            );
        }
        let ranges = self.eligible_ranges(table, now)?;
        if ranges.is_empty() {
            return Ok(());
        }
        self.layout.ensure_directory()?;
        for range in &ranges {
            let store_name = ArchiveLayout::store_name(range.quarter);
            let archive_path = self.layout.archive_path(range.quarter);
            self.sink.record(
                &ArchiveEvent::info(
                    "range_started",
                    Some(table.name.as_str()),
                    format!("draining window into {store_name}"),
                )
                .with_detail(json!({ "range": range, "archive": store_name })),
            );
            let transfer = open_archive_connection(&archive_path, &self.source_config)?;
            self.provision(&transfer)?;
            progress.touch_target(&store_name);
            self.repair_torn_batches(&transfer, table, range, &store_name, heartbeat)?;
            loop {
                let outcome = self.move_batch_on(&transfer, table, range)?;
                if outcome.moved == 0 {
                    break;
                }
                heartbeat();
                let moved = u64::try_from(outcome.moved).unwrap_or(u64::MAX);
                progress.observe_batch(moved, outcome.earliest, outcome.latest);
                self.sink.record(
                    &ArchiveEvent::info(
                        "batch_committed",
                        Some(table.name.as_str()),
                        format!("moved {moved} row(s) into {store_name}"),
                    )
                    .with_detail(json!({ "moved": moved, "archive": store_name })),
                );
                if !self.settings.batch_delay.is_zero() {
                    thread::sleep(self.settings.batch_delay);
                }
            }
        }
        Ok(())
    }

    /// Ensures every configured table exists in the archive on `transfer`.
    fn provision(&self, transfer: &Connection) -> Result<(), ArchiveStoreError> {
        let attached = AttachedSource::attach(transfer, &self.source_config)?;
        let mut sources: Vec<(&TableSpec, Vec<ColumnInfo>)> =
            Vec::with_capacity(self.tables.len());
        for spec in &self.tables {
            sources.push((spec, read_source_columns(transfer, SOURCE_SCHEMA, &spec.name)?));
        }
        attached.detach()?;
        for (spec, columns) in sources {
            if columns.is_empty() {
                self.sink.record(&ArchiveEvent::warn(
                    "schema_source_missing",
                    Some(spec.name.as_str()),
                    "source table not found; archive table not provisioned",
                ));
                continue;
            }
            self.synchronizer.ensure_table(transfer, &spec.name, &columns)?;
        }
        Ok(())
    }

    /// Deletes source rows in `window` already present in the archive.
    ///
    /// Rows match when every column is identical, with the text time column
    /// also matching its canonical form. Works in `batch_size` chunks, each
    /// its own transaction under the batch deadline.
    fn repair_torn_batches(
        &self,
        transfer: &Connection,
        table: &TableSpec,
        window: &QuarterRange,
        store_name: &str,
        heartbeat: &dyn Fn(),
    ) -> Result<(), ArchiveStoreError> {
        let mut repaired = 0_usize;
        loop {
            let removed =
                self.with_deadline(transfer, || self.repair_pass(transfer, table, window))?;
            if removed == 0 {
                break;
            }
            repaired += removed;
            heartbeat();
            if removed < self.settings.batch_size {
                break;
            }
        }
        if repaired > 0 {
            self.sink.record(
                &ArchiveEvent::warn(
                    "torn_batch_repaired",
                    Some(table.name.as_str()),
                    format!("removed {repaired} already-archived source row(s)"),
                )
                .with_detail(json!({ "rows": repaired, "archive": store_name })),
            );
        }
        Ok(())
    }

    /// Deletes at most `batch_size` duplicated rows in one transaction.
    fn repair_pass(
        &self,
        transfer: &Connection,
        table: &TableSpec,
        window: &QuarterRange,
    ) -> Result<usize, ArchiveStoreError> {
        let columns = read_source_columns(transfer, SOURCE_SCHEMA, &table.name)?;
        let time_column = table.time_field.quoted();
        let source_time = format!("s.{time_column}");
        let matches: Vec<String> = columns
            .iter()
            .map(|column| {
                let name = quote_identifier(&column.name);
                if is_time_column(table, column) {
                    let stored = time_storage_expression(table.time_kind, &source_time);
                    format!("(a.{name} IS s.{name} OR a.{name} IS {stored})")
                } else {
                    format!("a.{name} IS s.{name}")
                }
            })
            .collect();
        let name = table.name.quoted();
        let pk = table.primary_key.quoted();
        let comparison = time_comparison_expression(table.time_kind, &source_time);
        let sql = format!(
            "DELETE FROM source.{name} WHERE {pk} IN (SELECT s.{pk} FROM source.{name} AS s JOIN \
             main.{name} AS a ON a.{pk} = s.{pk} WHERE {comparison} >= ?1 AND {comparison} < ?2 \
             AND {} LIMIT ?3)",
            matches.join(" AND ")
        );
        let lower = time_bound(table.time_kind, window.start)?;
        let upper = time_bound(table.time_kind, window.end)?;
        let limit = batch_limit(self.settings.batch_size)?;
        let tx =
            Transaction::new_unchecked(transfer, TransactionBehavior::Immediate).map_err(db_error)?;
        let removed = tx.execute(&sql, params![lower, upper, limit]).map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        Ok(removed)
    }

    /// Moves one batch using an already provisioned transfer connection.
    fn move_batch_on(
        &self,
        transfer: &Connection,
        table: &TableSpec,
        window: &QuarterRange,
    ) -> Result<BatchOutcome, ArchiveStoreError> {
        self.with_deadline(transfer, || self.transfer_batch(transfer, table, window))
    }

    /// Runs `work` with the source attached and the batch deadline armed.
    fn with_deadline<T>(
        &self,
        transfer: &Connection,
        work: impl FnOnce() -> Result<T, ArchiveStoreError>,
    ) -> Result<T, ArchiveStoreError> {
        let attached = AttachedSource::attach(transfer, &self.source_config)?;
        let deadline =
            BatchDeadline::arm(transfer.get_interrupt_handle(), self.settings.batch_timeout)?;
        let outcome = work();
        deadline.disarm();
        let detached = attached.detach();
        let outcome = outcome?;
        detached?;
        Ok(outcome)
    }

    /// Runs the batch transaction; dropping `tx` on error rolls it back.
    fn transfer_batch(
        &self,
        transfer: &Connection,
        table: &TableSpec,
        window: &QuarterRange,
    ) -> Result<BatchOutcome, ArchiveStoreError> {
        let name = table.name.quoted();
        let pk = table.primary_key.quoted();
        let time_column = table.time_field.quoted();
        let comparison = time_comparison_expression(table.time_kind, &time_column);
        let value = time_value_expression(table.time_kind, &time_column);
        let lower = time_bound(table.time_kind, window.start)?;
        let upper = time_bound(table.time_kind, window.end)?;
        let limit = batch_limit(self.settings.batch_size)?;

        let tx =
            Transaction::new_unchecked(transfer, TransactionBehavior::Immediate).map_err(db_error)?;
        let select = format!(
            "SELECT {pk}, {value} FROM source.{name} WHERE {comparison} >= ?1 AND {comparison} < \
             ?2 ORDER BY {pk} LIMIT ?3"
        );
        let mut keys: Vec<Value> = Vec::new();
        let mut outcome = BatchOutcome::default();
        {
            let mut stmt = tx.prepare(&select).map_err(db_error)?;
            let mut rows = stmt.query(params![lower, upper, limit]).map_err(db_error)?;
            while let Some(row) = rows.next().map_err(db_error)? {
                keys.push(row.get::<_, Value>(0).map_err(db_error)?);
                let raw_time: Value = row.get(1).map_err(db_error)?;
                if let Some(instant) = decode_time(table.time_kind, &raw_time)? {
                    outcome.earliest =
                        Some(outcome.earliest.map_or(instant, |current| current.min(instant)));
                    outcome.latest =
                        Some(outcome.latest.map_or(instant, |current| current.max(instant)));
                }
            }
        }
        if keys.is_empty() {
            tx.commit().map_err(db_error)?;
            return Ok(outcome);
        }

        let columns = read_source_columns(&tx, SOURCE_SCHEMA, &table.name)?;
        let column_list = columns
            .iter()
            .map(|column| quote_identifier(&column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let select_list = columns
            .iter()
            .map(|column| {
                let name = quote_identifier(&column.name);
                if is_time_column(table, column) {
                    time_storage_expression(table.time_kind, &name)
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; keys.len()].join(", ");
        let insert = format!(
            "INSERT INTO main.{name} ({column_list}) SELECT {select_list} FROM source.{name} WHERE \
             {pk} IN ({placeholders})"
        );
        let inserted = tx.execute(&insert, params_from_iter(keys.iter())).map_err(db_error)?;
        verify_count(table, "insert", keys.len(), inserted)?;
        let delete = format!("DELETE FROM source.{name} WHERE {pk} IN ({placeholders})");
        let deleted = tx.execute(&delete, params_from_iter(keys.iter())).map_err(db_error)?;
        verify_count(table, "delete", keys.len(), deleted)?;
        tx.commit().map_err(db_error)?;
        outcome.moved = keys.len();
        Ok(outcome)
    }
}

impl TableArchiver for SqliteArchiveEngine {
    fn archive_table_with_heartbeat(
        &self,
        table: &TableSpec,
        now: OffsetDateTime,
        heartbeat: &dyn Fn(),
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut progress = ResultAccumulator::new();
        self.sink.record(
            &ArchiveEvent::info("table_started", Some(table.name.as_str()), "table run started")
                .with_detail(json!({
                    "time_field": table.time_field,
                    "time_kind": table.time_kind.as_str(),
                    "retention_months": effective_retention_months(table.retention_months),
                })),
        );
        match self.run_table(table, now, &mut progress, heartbeat) {
            Ok(()) => {
                self.sink.record(
                    &ArchiveEvent::info(
                        "table_completed",
                        Some(table.name.as_str()),
                        format!("archived {} row(s)", progress.archived_count()),
                    )
                    .with_detail(json!({ "archived": progress.archived_count() })),
                );
                progress.succeed(table.name.as_str(), started.elapsed())
            }
            Err(err) => {
                self.sink.record(
                    &ArchiveEvent::error(
                        "table_failed",
                        Some(table.name.as_str()),
                        format!("table run aborted: {err}"),
                    )
                    .with_detail(json!({ "archived": progress.archived_count() })),
                );
                progress.fail(table.name.as_str(), started.elapsed(), err.to_string())
            }
        }
    }
}

// ============================================================================
// SECTION: Attach Guard
// ============================================================================

/// Source database attached to a transfer connection; detached on drop.
struct AttachedSource<'conn> {
    /// Transfer connection.
    connection: &'conn Connection,
    /// Whether the alias is still attached.
    attached: bool,
}

impl<'conn> AttachedSource<'conn> {
    /// Attaches the source under [`SOURCE_SCHEMA`] and applies its sync mode.
    fn attach(
        connection: &'conn Connection,
        config: &SqliteStoreConfig,
    ) -> Result<Self, ArchiveStoreError> {
        let path = config.path.to_str().ok_or_else(|| {
            ArchiveStoreError::Invalid("source path is not valid UTF-8".to_string())
        })?;
        connection
            .execute(&format!("ATTACH DATABASE ?1 AS {}", quote_identifier(SOURCE_SCHEMA)), [path])
            .map_err(db_error)?;
        let guard = Self {
            connection,
            attached: true,
        };
        connection
            .execute_batch(&format!(
                "PRAGMA {}.synchronous = {};",
                quote_identifier(SOURCE_SCHEMA),
                config.sync_mode.pragma_value()
            ))
            .map_err(db_error)?;
        Ok(guard)
    }

    /// Detaches the source.
    fn detach(mut self) -> Result<(), ArchiveStoreError> {
        self.attached = false;
        self.connection
            .execute_batch(&format!("DETACH DATABASE {};", quote_identifier(SOURCE_SCHEMA)))
            .map_err(db_error)
    }
}

impl Drop for AttachedSource<'_> {
    fn drop(&mut self) {
        if self.attached {
            let _ = self
                .connection
                .execute_batch(&format!("DETACH DATABASE {};", quote_identifier(SOURCE_SCHEMA)));
        }
    }
}

// ============================================================================
// SECTION: Batch Deadline
// ============================================================================

/// Watchdog that interrupts the transfer connection after a deadline.
struct BatchDeadline {
    /// Signals the watchdog that the batch finished.
    cancel: mpsc::Sender<()>,
    /// Watchdog thread.
    worker: JoinHandle<()>,
}

impl BatchDeadline {
    /// Starts a watchdog for `timeout`.
    fn arm(handle: InterruptHandle, timeout: Duration) -> Result<Self, ArchiveStoreError> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name("quarry-batch-deadline".to_string())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    handle.interrupt();
                }
            })
            .map_err(|err| ArchiveStoreError::Io(format!("batch deadline thread: {err}")))?;
        Ok(Self {
            cancel,
            worker,
        })
    }

    /// Stops the watchdog and waits for it to exit.
    fn disarm(self) {
        let _ = self.cancel.send(());
        let _ = self.worker.join();
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true when `column` is the table's time field.
fn is_time_column(table: &TableSpec, column: &ColumnInfo) -> bool {
    column.name.eq_ignore_ascii_case(table.time_field.as_str())
}

/// Converts the batch size into a SQL `LIMIT` value.
fn batch_limit(batch_size: usize) -> Result<i64, ArchiveStoreError> {
    i64::try_from(batch_size)
        .map_err(|_| ArchiveStoreError::Invalid("batch size exceeds i64".to_string()))
}

/// Checks an affected-row count against the selected batch size.
fn verify_count(
    table: &TableSpec,
    stage: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), ArchiveStoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ArchiveStoreError::BatchIntegrity {
            table: table.name.to_string(),
            stage,
            expected,
            actual,
        })
    }
}
