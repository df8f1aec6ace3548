// crates/quarry-core/tests/quarter.rs
// ============================================================================
// Module: Quarter Math Tests
// Description: Quarter keys, retention cutoffs, and archival windows.
// Purpose: Pin calendar edge cases that decide which archive a row lands in.
// Dependencies: quarry-core, proptest, time
// ============================================================================

//! ## Overview
//! Example-based checks for month clamping and quarter boundaries, plus
//! properties over arbitrary instants: every instant lies inside its own
//! quarter, and windows tile the eligible span without gaps or overlap.

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

use proptest::prelude::*;
use quarry_core::QuarterKey;
use quarry_core::QuarterRange;
use quarry_core::quarter::effective_retention_months;
use quarry_core::quarter_key;
use quarry_core::quarter_windows;
use quarry_core::retention_cutoff;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Quarter Keys
// ============================================================================

#[test]
fn keys_follow_utc_calendar_quarters() {
    assert_eq!(quarter_key(datetime!(2025-02-14 10:00 UTC)).to_string(), "2025_Q1");
    assert_eq!(quarter_key(datetime!(2025-04-01 00:00 UTC)).to_string(), "2025_Q2");
    assert_eq!(quarter_key(datetime!(2025-09-30 23:59:59 UTC)).to_string(), "2025_Q3");
    assert_eq!(quarter_key(datetime!(2024-12-31 23:59:59 UTC)).to_string(), "2024_Q4");
}

#[test]
fn keys_are_evaluated_in_utc() {
    let local = datetime!(2025-03-31 23:30 -02:00);
    assert_eq!(quarter_key(local).to_string(), "2025_Q2");
}

#[test]
fn keys_parse_only_the_canonical_form() {
    let key: QuarterKey = "2025_Q3".parse().unwrap();
    assert_eq!((key.year(), key.quarter()), (2025, 3));
    for bad in ["2025_Q5", "2025_Q0", "25_Q1", "2025Q1", "2025_Q10", "abcd_Q1", ""] {
        assert!(bad.parse::<QuarterKey>().is_err(), "accepted {bad}");
    }
}

#[test]
fn keys_order_chronologically() {
    let mut keys: Vec<QuarterKey> =
        ["2025_Q1", "2024_Q4", "2024_Q1", "2025_Q2"].iter().map(|raw| raw.parse().unwrap()).collect();
    keys.sort();
    let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["2024_Q1", "2024_Q4", "2025_Q1", "2025_Q2"]);
}

#[test]
fn quarter_bounds_roll_over_the_year() {
    let key = QuarterKey::new(2024, 4).unwrap();
    assert_eq!(key.start().unwrap(), datetime!(2024-10-01 00:00 UTC));
    assert_eq!(key.end().unwrap(), datetime!(2025-01-01 00:00 UTC));
    assert_eq!(key.next().unwrap().to_string(), "2025_Q1");
    assert!(QuarterKey::new(2024, 5).is_err());
}

// ============================================================================
// SECTION: Retention Cutoff
// ============================================================================

#[test]
fn cutoff_clamps_to_the_end_of_short_months() {
    assert_eq!(
        retention_cutoff(datetime!(2025-03-31 12:00 UTC), 1).unwrap(),
        datetime!(2025-02-28 12:00 UTC)
    );
    assert_eq!(
        retention_cutoff(datetime!(2024-03-31 12:00 UTC), 1).unwrap(),
        datetime!(2024-02-29 12:00 UTC)
    );
    assert_eq!(
        retention_cutoff(datetime!(2025-05-31 00:00 UTC), 1).unwrap(),
        datetime!(2025-04-30 00:00 UTC)
    );
}

#[test]
fn cutoff_crosses_year_boundaries() {
    assert_eq!(
        retention_cutoff(datetime!(2025-01-15 08:00 UTC), 2).unwrap(),
        datetime!(2024-11-15 08:00 UTC)
    );
    assert_eq!(
        retention_cutoff(datetime!(2025-07-10 00:00 UTC), 1_200).unwrap(),
        datetime!(1925-07-10 00:00 UTC)
    );
}

#[test]
fn unusable_retention_falls_back_to_six_months() {
    let now = datetime!(2025-07-10 00:00 UTC);
    let expected = datetime!(2025-01-10 00:00 UTC);
    for raw in [0, -3, 1_201, i64::MAX, i64::MIN] {
        assert_eq!(effective_retention_months(raw), 6);
        assert_eq!(retention_cutoff(now, raw).unwrap(), expected, "retention {raw}");
    }
    assert_eq!(effective_retention_months(1), 1);
}

// ============================================================================
// SECTION: Windows
// ============================================================================

#[test]
fn windows_span_quarters_and_clip_at_the_cutoff() {
    let ranges = quarter_windows(
        datetime!(2024-11-05 00:00 UTC),
        datetime!(2025-02-01 00:00 UTC),
        datetime!(2025-02-15 00:00 UTC),
    )
    .unwrap();

    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0].quarter.to_string(), "2024_Q4");
    assert_eq!(ranges[0].start, datetime!(2024-10-01 00:00 UTC));
    assert_eq!(ranges[0].end, datetime!(2025-01-01 00:00 UTC));
    assert_eq!(ranges[1].quarter.to_string(), "2025_Q1");
    assert_eq!(ranges[1].start, datetime!(2025-01-01 00:00 UTC));
    assert_eq!(ranges[1].end, datetime!(2025-02-15 00:00 UTC));
}

#[test]
fn windows_stop_at_the_latest_quarter() {
    let ranges = quarter_windows(
        datetime!(2024-01-10 00:00 UTC),
        datetime!(2024-01-20 00:00 UTC),
        datetime!(2025-06-01 00:00 UTC),
    )
    .unwrap();

    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].end, datetime!(2024-04-01 00:00 UTC));
}

#[test]
fn cutoff_on_a_quarter_boundary_yields_a_full_window() {
    let ranges = quarter_windows(
        datetime!(2024-12-01 00:00 UTC),
        datetime!(2024-12-31 23:00 UTC),
        datetime!(2025-01-01 00:00 UTC),
    )
    .unwrap();

    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].quarter.to_string(), "2024_Q4");
    assert_eq!(ranges[0].end, datetime!(2025-01-01 00:00 UTC));
}

#[test]
fn nothing_eligible_yields_no_windows() {
    let cutoff = datetime!(2025-01-01 00:00 UTC);
    assert!(quarter_windows(cutoff, cutoff, cutoff).unwrap().is_empty());
    assert!(
        quarter_windows(datetime!(2025-03-01 00:00 UTC), datetime!(2025-03-02 00:00 UTC), cutoff)
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// SECTION: Properties
// ============================================================================

/// First second of 9999, so every generated quarter has a representable end.
const MAX_SECONDS: i64 = 253_370_764_800;

proptest! {
    #[test]
    fn every_instant_lies_inside_its_quarter(seconds in -62_135_596_800_i64..MAX_SECONDS) {
        let instant = OffsetDateTime::from_unix_timestamp(seconds).unwrap();
        let key = quarter_key(instant);
        prop_assert!(key.start().unwrap() <= instant);
        prop_assert!(instant < key.end().unwrap());
    }

    #[test]
    fn windows_tile_the_eligible_span(
        earliest in 0_i64..4_000_000_000,
        span in 0_i64..200_000_000,
        margin in 1_i64..100_000_000,
    ) {
        let earliest_at = OffsetDateTime::from_unix_timestamp(earliest).unwrap();
        let latest_at = OffsetDateTime::from_unix_timestamp(earliest + span).unwrap();
        let cutoff = OffsetDateTime::from_unix_timestamp(earliest + span + margin).unwrap();

        let ranges = quarter_windows(earliest_at, latest_at, cutoff).unwrap();

        prop_assert!(!ranges.is_empty());
        let holds = |range: &QuarterRange, instant| range.start <= instant && instant < range.end;
        prop_assert!(holds(&ranges[0], earliest_at));
        prop_assert!(ranges.iter().any(|range| holds(range, latest_at)));
        for range in &ranges {
            prop_assert!(range.start < range.end);
            prop_assert!(range.end <= cutoff);
            prop_assert!(range.end <= range.quarter.end().unwrap());
            prop_assert_eq!(range.start, range.quarter.start().unwrap());
        }
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
    }
}
