// crates/quarry-store-sqlite/tests/archive_engine.rs
// ============================================================================
// Module: Archive Engine Tests
// Description: End-to-end table runs against on-disk SQLite fixtures.
// Purpose: Verify no-loss moves, quarter routing, cutoffs, and idempotence.
// Dependencies: quarry-core, quarry-store-sqlite, rusqlite, tempfile, time
// ============================================================================

//! ## Overview
//! Each test builds a source database in a temp directory, runs the engine
//! at a fixed `now`, and inspects both the source and the archive files with
//! plain `rusqlite` queries.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod helpers;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::Cell;
use std::time::Duration;

use quarry_core::ArchiveLayout;
use quarry_core::QuarterKey;
use quarry_core::TableArchiver;
use quarry_store_sqlite::DEFAULT_BATCH_DELAY;
use quarry_store_sqlite::DEFAULT_BATCH_SIZE;
use quarry_store_sqlite::DEFAULT_BATCH_TIMEOUT;
use quarry_store_sqlite::EngineSettings;
use quarry_store_sqlite::MAX_BATCH_SIZE;
use rusqlite::Connection;
use time::macros::datetime;

use crate::helpers::Fixture;
use crate::helpers::audit_trail;
use crate::helpers::count_rows;
use crate::helpers::events_named;
use crate::helpers::ids;
use crate::helpers::metrics;
use crate::helpers::request_logs;
use crate::helpers::spec;
use crate::helpers::table_exists;

// ============================================================================
// SECTION: Single Quarter
// ============================================================================

#[test]
fn moves_rows_older_than_cutoff_into_their_quarter() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-01-10 00:00 UTC));
    fixture.insert_request(2, datetime!(2025-02-20 12:00 UTC));
    fixture.insert_request(3, datetime!(2025-03-14 23:59:59 UTC));
    fixture.insert_request(4, datetime!(2025-03-15 00:00 UTC));
    fixture.insert_request(5, datetime!(2025-04-01 00:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 3);
    assert_eq!(result.target_archive_dbs, vec!["archive_2025_Q1".to_string()]);
    assert_eq!(result.data_range_start.as_deref(), Some("2025-01-10T00:00:00Z"));
    assert_eq!(result.data_range_end.as_deref(), Some("2025-03-14T23:59:59Z"));
    assert!(result.error_message.is_none());
    assert_eq!(ids(&fixture.source_path, "request_logs"), vec![4, 5]);
    assert_eq!(ids(&fixture.archive_path("2025_Q1"), "request_logs"), vec![1, 2, 3]);
}

#[test]
fn archived_rows_keep_every_column_value() {
    let fixture = Fixture::new();
    fixture.insert_request(7, datetime!(2024-12-01 08:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));
    assert!(result.success);

    let archive = Connection::open(fixture.archive_path("2024_Q4")).unwrap();
    let (created_at, path, status): (i64, String, i64) = archive
        .query_row("SELECT created_at, path, status FROM request_logs WHERE id = 7", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!(created_at, datetime!(2024-12-01 08:00 UTC).unix_timestamp());
    assert_eq!(path, "/r/7");
    assert_eq!(status, 200);
}

#[test]
fn second_run_is_a_no_op() {
    let fixture = Fixture::new();
    for id in 1..=5 {
        fixture.insert_request(id, datetime!(2025-01-10 00:00 UTC));
    }
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);
    let now = datetime!(2025-04-15 00:00 UTC);

    let first = engine.archive_table(&table, now);
    let second = engine.archive_table(&table, now);

    assert_eq!(first.archived_count, 5);
    assert!(second.success);
    assert_eq!(second.archived_count, 0);
    assert!(second.target_archive_dbs.is_empty());
    assert!(second.data_range_start.is_none());
    assert_eq!(count_rows(&fixture.archive_path("2025_Q1"), "request_logs"), 5);
    assert_eq!(count_rows(&fixture.source_path, "request_logs"), 0);
}

#[test]
fn empty_table_succeeds_without_touching_archives() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-04-10 00:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success);
    assert_eq!(result.archived_count, 0);
    assert!(!fixture.archive_dir.exists());
}

// ============================================================================
// SECTION: Quarter Routing
// ============================================================================

#[test]
fn rows_spanning_quarters_land_in_separate_archives() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2024-08-15 00:00 UTC));
    fixture.insert_request(2, datetime!(2024-09-30 23:59:59 UTC));
    fixture.insert_request(3, datetime!(2024-10-01 00:00 UTC));
    fixture.insert_request(4, datetime!(2024-12-31 23:59:59 UTC));
    fixture.insert_request(5, datetime!(2025-01-01 00:00 UTC));
    fixture.insert_request(6, datetime!(2025-02-01 00:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success);
    assert_eq!(result.archived_count, 6);
    assert_eq!(
        result.target_archive_dbs,
        vec!["archive_2024_Q3".to_string(), "archive_2024_Q4".to_string(), "archive_2025_Q1".to_string()]
    );
    assert_eq!(ids(&fixture.archive_path("2024_Q3"), "request_logs"), vec![1, 2]);
    assert_eq!(ids(&fixture.archive_path("2024_Q4"), "request_logs"), vec![3, 4]);
    assert_eq!(ids(&fixture.archive_path("2025_Q1"), "request_logs"), vec![5, 6]);
    assert_eq!(
        fixture.layout().list_archives().unwrap(),
        vec![
            "2025_Q1".parse::<QuarterKey>().unwrap(),
            "2024_Q4".parse::<QuarterKey>().unwrap(),
            "2024_Q3".parse::<QuarterKey>().unwrap(),
        ]
    );
}

#[test]
fn cutoff_inside_quarter_clips_the_last_window() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-04-02 00:00 UTC));
    fixture.insert_request(2, datetime!(2025-05-14 23:00 UTC));
    fixture.insert_request(3, datetime!(2025-05-15 00:00 UTC));
    fixture.insert_request(4, datetime!(2025-06-20 00:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);
    let now = datetime!(2025-06-15 00:00 UTC);

    let plan = engine.plan_table(&table, now).unwrap();
    assert_eq!(plan.cutoff, datetime!(2025-05-15 00:00 UTC));
    assert_eq!(plan.eligible_rows, 2);
    assert_eq!(plan.ranges.len(), 1);
    assert_eq!(plan.ranges[0].start, datetime!(2025-04-01 00:00 UTC));
    assert_eq!(plan.ranges[0].end, datetime!(2025-05-15 00:00 UTC));
    assert_eq!(plan.target_archive_dbs, vec!["archive_2025_Q2".to_string()]);

    let result = engine.archive_table(&table, now);
    assert_eq!(result.archived_count, 2);
    assert_eq!(ids(&fixture.source_path, "request_logs"), vec![3, 4]);
}

#[test]
fn plan_does_not_move_rows() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2024-01-10 00:00 UTC));
    fixture.insert_request(2, datetime!(2024-07-10 00:00 UTC));
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let plan = engine.plan_table(&table, datetime!(2025-04-15 00:00 UTC)).unwrap();

    assert_eq!(plan.eligible_rows, 2);
    assert_eq!(
        plan.target_archive_dbs,
        vec![
            "archive_2024_Q1".to_string(),
            "archive_2024_Q2".to_string(),
            "archive_2024_Q3".to_string(),
        ]
    );
    assert_eq!(count_rows(&fixture.source_path, "request_logs"), 2);
    assert!(!fixture.archive_dir.exists());
}

#[test]
fn invalid_retention_falls_back_to_six_months() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2024-10-14 00:00 UTC));
    fixture.insert_request(2, datetime!(2024-10-16 00:00 UTC));
    let table = request_logs(0);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let plan = engine.plan_table(&table, datetime!(2025-04-15 00:00 UTC)).unwrap();
    assert_eq!(plan.retention_months, 6);
    assert_eq!(plan.cutoff, datetime!(2024-10-15 00:00 UTC));

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));
    assert_eq!(result.archived_count, 1);
    assert_eq!(ids(&fixture.source_path, "request_logs"), vec![2]);
}

// ============================================================================
// SECTION: Batching
// ============================================================================

#[test]
fn small_batches_drain_the_window() {
    let fixture = Fixture::new();
    for id in 1..=7 {
        fixture.insert_request(id, datetime!(2025-02-01 00:00 UTC));
    }
    let table = request_logs(1);
    let (engine, sink) = fixture.engine(vec![table.clone()], 2);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success);
    assert_eq!(result.archived_count, 7);
    let batches = sink.event_names().iter().filter(|name| **name == "batch_committed").count();
    assert_eq!(batches, 4);
    assert_eq!(count_rows(&fixture.source_path, "request_logs"), 0);
    assert_eq!(ids(&fixture.archive_path("2025_Q1"), "request_logs"), (1..=7).collect::<Vec<_>>());
}

#[test]
fn heartbeat_fires_after_every_committed_batch() {
    let fixture = Fixture::new();
    for id in 1..=5 {
        fixture.insert_request(id, datetime!(2025-01-10 00:00 UTC));
    }
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 2);
    let beats = Cell::new(0_u32);

    let result = engine.archive_table_with_heartbeat(
        &table,
        datetime!(2025-04-15 00:00 UTC),
        &|| beats.set(beats.get() + 1),
    );

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 5);
    assert_eq!(beats.get(), 3);
}

#[test]
fn oversized_batch_setting_is_capped() {
    let fixture = Fixture::new();
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table], 50_000);
    assert_eq!(engine.settings().batch_size, MAX_BATCH_SIZE);
}

#[test]
fn unusable_settings_fall_back_to_defaults() {
    let settings = EngineSettings {
        batch_size: 0,
        batch_delay: Duration::from_secs(60),
        batch_timeout: Duration::ZERO,
    }
    .sanitized();

    assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(settings.batch_delay, DEFAULT_BATCH_DELAY);
    assert_eq!(settings.batch_timeout, DEFAULT_BATCH_TIMEOUT);

    let tuned = EngineSettings {
        batch_size: 25,
        batch_delay: Duration::from_millis(5),
        batch_timeout: Duration::from_secs(2),
    };
    assert_eq!(tuned.sanitized(), tuned);
}

#[test]
fn move_batch_moves_at_most_one_batch() {
    let fixture = Fixture::new();
    for id in 1..=5 {
        fixture.insert_request(id, datetime!(2025-02-01 00:00 UTC));
    }
    let table = request_logs(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 3);
    let ranges = engine.eligible_ranges(&table, datetime!(2025-04-15 00:00 UTC)).unwrap();
    assert_eq!(ranges.len(), 1);
    let archive = fixture.archive_path("2025_Q1");

    let first = engine.move_batch(&table, &ranges[0], &archive).unwrap();
    assert_eq!(first.moved, 3);
    assert_eq!(first.earliest, Some(datetime!(2025-02-01 00:00 UTC)));
    assert_eq!(ids(&archive, "request_logs"), vec![1, 2, 3]);

    let second = engine.move_batch(&table, &ranges[0], &archive).unwrap();
    assert_eq!(second.moved, 2);
    let third = engine.move_batch(&table, &ranges[0], &archive).unwrap();
    assert_eq!(third.moved, 0);
    assert!(third.earliest.is_none());
}

// ============================================================================
// SECTION: Time Field Kinds
// ============================================================================

#[test]
fn text_time_fields_are_normalized_for_comparison() {
    let fixture = Fixture::new();
    fixture.insert_audit(1, "2024-11-05T10:00:00Z");
    fixture.insert_audit(2, "2024/12/01 08:30");
    fixture.insert_audit(3, "2025-01-02 03:04:05.678+02:00");
    fixture.insert_audit(4, "2025-01-01T01:00:00+03:00");
    fixture.insert_audit(5, "2025-03-20T00:00:00");
    fixture.insert_audit(6, "not a timestamp");
    let table = audit_trail(1);
    let (engine, sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 4);
    assert_eq!(result.data_range_start.as_deref(), Some("2024-11-05T10:00:00Z"));
    assert_eq!(result.data_range_end.as_deref(), Some("2025-01-02T01:04:05Z"));
    assert_eq!(ids(&fixture.archive_path("2024_Q4"), "audit_trail"), vec![1, 2, 4]);
    assert_eq!(ids(&fixture.archive_path("2025_Q1"), "audit_trail"), vec![3]);
    assert_eq!(ids(&fixture.source_path, "audit_trail"), vec![5, 6]);

    let archive = Connection::open(fixture.archive_path("2024_Q4")).unwrap();
    let stored: String = archive
        .query_row("SELECT happened_at FROM audit_trail WHERE id = 2", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, "2024-12-01 08:30:00");
    let unreadable = events_named(&sink, "time_value_unreadable");
    assert_eq!(unreadable.len(), 1);
    assert_eq!(unreadable[0].detail.as_ref().unwrap()["rows"], 1);
}

#[test]
fn compact_offsets_are_archived_like_colon_offsets() {
    let fixture = Fixture::new();
    fixture.insert_audit(1, "2025-01-10 00:00:00 +0000");
    fixture.insert_audit(2, "2025-01-10T00:00:00+0100");
    fixture.insert_audit(3, "2025-01-10T00:00:00+01:00");
    fixture.insert_audit(4, "2025-04-01 00:00:00 -0500");
    let table = audit_trail(1);
    let (engine, sink) = fixture.engine(vec![table.clone()], 800);
    let now = datetime!(2025-04-15 00:00 UTC);

    let plan = engine.plan_table(&table, now).unwrap();
    assert_eq!(plan.eligible_rows, 3);
    assert_eq!(plan.unreadable_rows, 0);

    let result = engine.archive_table(&table, now);

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 3);
    assert_eq!(ids(&fixture.source_path, "audit_trail"), vec![4]);
    let archive = Connection::open(fixture.archive_path("2025_Q1")).unwrap();
    let mut stmt = archive.prepare("SELECT happened_at FROM audit_trail ORDER BY id").unwrap();
    let stored: Vec<String> =
        stmt.query_map([], |row| row.get(0)).unwrap().map(Result::unwrap).collect();
    assert_eq!(stored, vec!["2025-01-10 00:00:00", "2025-01-09 23:00:00", "2025-01-09 23:00:00"]);
    assert!(!sink.event_names().contains(&"time_value_unreadable"));
}

#[test]
fn unreadable_text_rows_are_counted_and_left_in_place() {
    let fixture = Fixture::new();
    fixture.insert_audit(1, "2024-11-05T10:00:00Z");
    fixture.insert_audit(2, "05/11/2024 10:00");
    fixture.insert_audit(3, "2024-11-05 10:00:00 +05");
    let table = audit_trail(1);
    let (engine, sink) = fixture.engine(vec![table.clone()], 800);
    let now = datetime!(2025-04-15 00:00 UTC);

    let plan = engine.plan_table(&table, now).unwrap();
    assert_eq!(plan.eligible_rows, 1);
    assert_eq!(plan.unreadable_rows, 2);
    assert_eq!(engine.count_unreadable(&table).unwrap(), 2);

    let result = engine.archive_table(&table, now);

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 1);
    assert_eq!(ids(&fixture.source_path, "audit_trail"), vec![2, 3]);
    let warning = &events_named(&sink, "time_value_unreadable")[0];
    assert_eq!(warning.table.as_deref(), Some("audit_trail"));
    assert_eq!(warning.detail.as_ref().unwrap()["rows"], 2);
}

#[test]
fn numeric_time_fields_never_count_as_unreadable() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-01-10 00:00 UTC));
    let (engine, _sink) = fixture.engine(vec![request_logs(1)], 800);
    assert_eq!(engine.count_unreadable(&request_logs(1)).unwrap(), 0);
}

#[test]
fn epoch_millisecond_fields_compare_numerically() {
    let fixture = Fixture::new();
    fixture.insert_metric(1, datetime!(2025-03-14 23:59:59.999 UTC));
    fixture.insert_metric(2, datetime!(2025-03-15 00:00 UTC));
    let table = metrics(1);
    let (engine, _sink) = fixture.engine(vec![table.clone()], 800);

    let result = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.archived_count, 1);
    assert_eq!(result.data_range_end.as_deref(), Some("2025-03-14T23:59:59.999Z"));
    assert_eq!(ids(&fixture.archive_path("2025_Q1"), "metrics"), vec![1]);
    assert_eq!(ids(&fixture.source_path, "metrics"), vec![2]);
}

// ============================================================================
// SECTION: Provisioning
// ============================================================================

#[test]
fn every_configured_table_is_provisioned_in_a_new_archive() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-01-10 00:00 UTC));
    let tables = vec![request_logs(1), audit_trail(1), metrics(1)];
    let (engine, sink) = fixture.engine(tables.clone(), 800);

    let result = engine.archive_table(&tables[0], datetime!(2025-04-15 00:00 UTC));

    assert!(result.success);
    let archive = fixture.archive_path("2025_Q1");
    assert!(table_exists(&archive, "request_logs"));
    assert!(table_exists(&archive, "audit_trail"));
    assert!(table_exists(&archive, "metrics"));
    assert_eq!(count_rows(&archive, "audit_trail"), 0);
    let created = sink.event_names().iter().filter(|name| **name == "schema_table_created").count();
    assert_eq!(created, 3);
}

#[test]
fn missing_source_table_is_skipped_during_provisioning() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-01-10 00:00 UTC));
    let ghost = spec("ghost_events", "created_at", quarry_core::TimeFieldKind::EpochSeconds, 1);
    let tables = vec![request_logs(1), ghost.clone()];
    let (engine, sink) = fixture.engine(tables.clone(), 800);
    let now = datetime!(2025-04-15 00:00 UTC);

    let result = engine.archive_table(&tables[0], now);
    assert!(result.success, "{:?}", result.error_message);
    assert!(sink.event_names().contains(&"schema_source_missing"));
    assert!(!table_exists(&fixture.archive_path("2025_Q1"), "ghost_events"));

    let ghost_result = engine.archive_table(&ghost, now);
    assert!(!ghost_result.success);
    assert!(ghost_result.error_message.unwrap().contains("ghost_events"));
}

#[test]
fn unconfigured_table_is_rejected() {
    let fixture = Fixture::new();
    let (engine, _sink) = fixture.engine(vec![request_logs(1)], 800);

    let result = engine.archive_table(&audit_trail(1), datetime!(2025-04-15 00:00 UTC));

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("allow-listed"));
}

#[test]
fn table_events_bracket_each_run() {
    let fixture = Fixture::new();
    fixture.insert_request(1, datetime!(2025-01-10 00:00 UTC));
    let table = request_logs(1);
    let (engine, sink) = fixture.engine(vec![table.clone()], 800);

    let _ = engine.archive_table(&table, datetime!(2025-04-15 00:00 UTC));

    let names = sink.event_names();
    assert_eq!(names.first(), Some(&"table_started"));
    assert_eq!(names.last(), Some(&"table_completed"));
    assert!(names.contains(&"range_started"));
    let events = sink.events();
    assert!(events.iter().all(|event| event.table.as_deref() == Some("request_logs")));
    assert_eq!(ArchiveLayout::store_name("2025_Q1".parse().unwrap()), "archive_2025_Q1");
}
