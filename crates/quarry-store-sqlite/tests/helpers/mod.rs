// crates/quarry-store-sqlite/tests/helpers/mod.rs
// ============================================================================
// Module: Archive Engine Test Helpers
// Description: On-disk source fixtures and engine builders.
// Purpose: Share setup between engine, schema, and fault-injection suites.
// Dependencies: quarry-core, quarry-store-sqlite, rusqlite, tempfile, time
// ============================================================================

//! ## Overview
//! Builds a WAL-mode source database with one table per time field kind and
//! engines over it with zero batch delay.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quarry_core::ArchiveAuditSink;
use quarry_core::ArchiveEvent;
use quarry_core::ArchiveLayout;
use quarry_core::Identifier;
use quarry_core::MemoryAuditSink;
use quarry_core::QuarterKey;
use quarry_core::TableSpec;
use quarry_core::TimeFieldKind;
use quarry_store_sqlite::EngineSettings;
use quarry_store_sqlite::SqliteArchiveEngine;
use quarry_store_sqlite::SqliteStoreConfig;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;
use time::OffsetDateTime;

pub const REQUEST_LOGS_DDL: &str = "CREATE TABLE request_logs (
    id INTEGER PRIMARY KEY,
    created_at INTEGER NOT NULL,
    path TEXT NOT NULL DEFAULT '/',
    status INTEGER,
    recorded TEXT DEFAULT CURRENT_TIMESTAMP
)";

pub const AUDIT_TRAIL_DDL: &str = "CREATE TABLE audit_trail (
    id INTEGER PRIMARY KEY,
    happened_at TEXT NOT NULL,
    actor TEXT NOT NULL
)";

pub const METRICS_DDL: &str = "CREATE TABLE metrics (
    id INTEGER PRIMARY KEY,
    sampled_ms INTEGER NOT NULL,
    value REAL NOT NULL
)";

pub struct Fixture {
    pub temp: TempDir,
    pub source_path: PathBuf,
    pub archive_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source_path = temp.path().join("app.sqlite");
        let archive_dir = temp.path().join("archive");
        let conn = Connection::open(&source_path).unwrap();
        conn.execute_batch("PRAGMA journal_mode = wal;").unwrap();
        conn.execute_batch(REQUEST_LOGS_DDL).unwrap();
        conn.execute_batch(AUDIT_TRAIL_DDL).unwrap();
        conn.execute_batch(METRICS_DDL).unwrap();
        Self {
            temp,
            source_path,
            archive_dir,
        }
    }

    pub fn source(&self) -> Connection {
        Connection::open(&self.source_path).unwrap()
    }

    pub fn store_config(&self) -> SqliteStoreConfig {
        let mut config = SqliteStoreConfig::new(&self.source_path);
        config.busy_timeout_ms = 1_000;
        config
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.archive_dir)
    }

    pub fn archive_path(&self, key: &str) -> PathBuf {
        self.layout().archive_path(key.parse::<QuarterKey>().unwrap())
    }

    pub fn engine(
        &self,
        tables: Vec<TableSpec>,
        batch_size: usize,
    ) -> (SqliteArchiveEngine, Arc<MemoryAuditSink>) {
        let settings = EngineSettings {
            batch_size,
            batch_delay: Duration::ZERO,
            ..EngineSettings::default()
        };
        self.engine_with(tables, settings)
    }

    pub fn engine_with(
        &self,
        tables: Vec<TableSpec>,
        settings: EngineSettings,
    ) -> (SqliteArchiveEngine, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = SqliteArchiveEngine::open(
            self.store_config(),
            self.layout(),
            tables,
            settings,
            Arc::clone(&sink) as Arc<dyn ArchiveAuditSink>,
        )
        .unwrap();
        (engine, sink)
    }

    pub fn insert_request(&self, id: i64, at: OffsetDateTime) {
        self.source()
            .execute(
                "INSERT INTO request_logs (id, created_at, path, status) VALUES (?1, ?2, ?3, ?4)",
                params![id, at.unix_timestamp(), format!("/r/{id}"), 200],
            )
            .unwrap();
    }

    pub fn insert_audit(&self, id: i64, happened_at: &str) {
        self.source()
            .execute(
                "INSERT INTO audit_trail (id, happened_at, actor) VALUES (?1, ?2, ?3)",
                params![id, happened_at, format!("user-{id}")],
            )
            .unwrap();
    }

    pub fn insert_metric(&self, id: i64, at: OffsetDateTime) {
        let millis = i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap();
        self.source()
            .execute(
                "INSERT INTO metrics (id, sampled_ms, value) VALUES (?1, ?2, ?3)",
                params![id, millis, 1.5],
            )
            .unwrap();
    }
}

pub fn spec(
    name: &str,
    time_field: &str,
    time_kind: TimeFieldKind,
    retention_months: i64,
) -> TableSpec {
    TableSpec {
        name: Identifier::new(name).unwrap(),
        time_field: Identifier::new(time_field).unwrap(),
        time_kind,
        primary_key: Identifier::new("id").unwrap(),
        retention_months,
    }
}

pub fn request_logs(retention_months: i64) -> TableSpec {
    spec("request_logs", "created_at", TimeFieldKind::EpochSeconds, retention_months)
}

pub fn audit_trail(retention_months: i64) -> TableSpec {
    spec("audit_trail", "happened_at", TimeFieldKind::Text, retention_months)
}

pub fn metrics(retention_months: i64) -> TableSpec {
    spec("metrics", "sampled_ms", TimeFieldKind::EpochMillis, retention_months)
}

pub fn events_named(sink: &MemoryAuditSink, name: &str) -> Vec<ArchiveEvent> {
    sink.events().into_iter().filter(|event| event.event == name).collect()
}

pub fn count_rows(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0)).unwrap()
}

pub fn ids(path: &Path, table: &str) -> Vec<i64> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare(&format!("SELECT id FROM \"{table}\" ORDER BY id")).unwrap();
    let ids = stmt.query_map([], |row| row.get(0)).unwrap().map(Result::unwrap).collect();
    ids
}

pub fn table_exists(path: &Path, table: &str) -> bool {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        > 0
}
