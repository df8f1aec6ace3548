// crates/quarry-core/src/quarter.rs
// ============================================================================
// Module: Quarter Math
// Description: UTC calendar quarters, retention cutoffs, and archival windows.
// Purpose: Map instants to quarter keys and split eligible time spans.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Every archive store holds exactly one UTC calendar quarter. This module
//! owns the pure calendar arithmetic behind that layout:
//! - [`QuarterKey`] identifies a quarter and renders as `<year>_Q<n>`.
//! - [`retention_cutoff`] subtracts whole calendar months from `now`.
//! - [`quarter_windows`] splits `[earliest, cutoff)` into half-open
//!   quarter-aligned [`QuarterRange`]s, clipping the last one to the cutoff.
//!
//! Nothing here performs I/O.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::Serializer;
use thiserror::Error;
use time::Date;
use time::Month;
use time::OffsetDateTime;
use time::UtcOffset;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Retention applied when a table's configured month count is unusable.
pub const DEFAULT_RETENTION_MONTHS: u32 = 6;
/// Upper bound on accepted retention months (one hundred years).
pub const MAX_RETENTION_MONTHS: i64 = 1_200;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Quarter arithmetic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuarterError {
    /// The computed date falls outside the supported calendar range.
    #[error("quarter out of range: {0}")]
    OutOfRange(String),
    /// A quarter key could not be parsed or constructed.
    #[error("invalid quarter key: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Quarter Key
// ============================================================================

/// UTC calendar quarter identifier.
///
/// # Invariants
/// - `quarter` is always within `1..=4`.
/// - Ordering is chronological: by year, then quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuarterKey {
    /// Calendar year.
    year: i32,
    /// Quarter number within the year (1-4).
    quarter: u8,
}

impl QuarterKey {
    /// Builds a quarter key from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`QuarterError::Invalid`] when `quarter` is not within `1..=4`.
    pub fn new(year: i32, quarter: u8) -> Result<Self, QuarterError> {
        if !(1..=4).contains(&quarter) {
            return Err(QuarterError::Invalid(format!("quarter must be 1-4, got {quarter}")));
        }
        Ok(Self {
            year,
            quarter,
        })
    }

    /// Returns the quarter containing `instant`, evaluated in UTC.
    #[must_use]
    pub fn containing(instant: OffsetDateTime) -> Self {
        let utc = instant.to_offset(UtcOffset::UTC);
        let month = u8::from(utc.month());
        Self {
            year: utc.year(),
            quarter: month.div_ceil(3),
        }
    }

    /// Returns the calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Returns the quarter number (1-4).
    #[must_use]
    pub const fn quarter(self) -> u8 {
        self.quarter
    }

    /// Returns the first instant of the quarter (UTC midnight).
    ///
    /// # Errors
    ///
    /// Returns [`QuarterError::OutOfRange`] when the year is unrepresentable.
    pub fn start(self) -> Result<OffsetDateTime, QuarterError> {
        let month = match self.quarter {
            1 => Month::January,
            2 => Month::April,
            3 => Month::July,
            _ => Month::October,
        };
        Date::from_calendar_date(self.year, month, 1)
            .map(|date| date.midnight().assume_utc())
            .map_err(|err| QuarterError::OutOfRange(format!("{self}: {err}")))
    }

    /// Returns the quarter immediately following this one.
    ///
    /// # Errors
    ///
    /// Returns [`QuarterError::OutOfRange`] on year overflow.
    pub fn next(self) -> Result<Self, QuarterError> {
        if self.quarter < 4 {
            return Ok(Self {
                year: self.year,
                quarter: self.quarter + 1,
            });
        }
        let year = self
            .year
            .checked_add(1)
            .ok_or_else(|| QuarterError::OutOfRange(format!("no quarter after {self}")))?;
        Ok(Self {
            year,
            quarter: 1,
        })
    }

    /// Returns the exclusive end instant of the quarter.
    ///
    /// # Errors
    ///
    /// Returns [`QuarterError::OutOfRange`] when the next quarter is
    /// unrepresentable.
    pub fn end(self) -> Result<OffsetDateTime, QuarterError> {
        self.next()?.start()
    }
}

impl fmt::Display for QuarterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_Q{}", self.year, self.quarter)
    }
}

impl FromStr for QuarterKey {
    type Err = QuarterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || QuarterError::Invalid(value.to_string());
        let (year, quarter) = value.split_once("_Q").ok_or_else(invalid)?;
        if year.len() != 4 || !year.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(invalid());
        }
        if quarter.len() != 1 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
        Self::new(year, quarter)
    }
}

impl Serialize for QuarterKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Returns the quarter key for `instant` (`<year>_Q<n>`, UTC).
#[must_use]
pub fn quarter_key(instant: OffsetDateTime) -> QuarterKey {
    QuarterKey::containing(instant)
}

// ============================================================================
// SECTION: Quarter Range
// ============================================================================

/// Half-open archival window `[start, end)` inside a single quarter.
///
/// # Invariants
/// - `start < end`.
/// - `start` is the quarter start or, for the first window, the quarter start
///   of the earliest eligible row; `end` never exceeds the retention cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuarterRange {
    /// Quarter the window belongs to.
    pub quarter: QuarterKey,
    /// Inclusive lower bound.
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    /// Exclusive upper bound.
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

// ============================================================================
// SECTION: Retention
// ============================================================================

/// Returns the retention month count actually applied for a raw value.
///
/// Zero, negative, and absurdly large values fall back to
/// [`DEFAULT_RETENTION_MONTHS`].
#[must_use]
pub fn effective_retention_months(raw: i64) -> u32 {
    if raw <= 0 || raw > MAX_RETENTION_MONTHS {
        return DEFAULT_RETENTION_MONTHS;
    }
    u32::try_from(raw).unwrap_or(DEFAULT_RETENTION_MONTHS)
}

/// Computes `now - retention_months` in whole calendar months (UTC).
///
/// The day of month is clamped to the length of the target month, so
/// `2025-03-31` minus one month is `2025-02-28`. Time of day is preserved.
///
/// # Errors
///
/// Returns [`QuarterError::OutOfRange`] when the result is unrepresentable.
pub fn retention_cutoff(
    now: OffsetDateTime,
    retention_months: i64,
) -> Result<OffsetDateTime, QuarterError> {
    let months = i64::from(effective_retention_months(retention_months));
    let utc = now.to_offset(UtcOffset::UTC);
    let month_index = i64::from(utc.year()) * 12 + i64::from(u8::from(utc.month())) - 1 - months;
    let out_of_range = || QuarterError::OutOfRange(format!("cutoff before {now} - {months}m"));
    let year = i32::try_from(month_index.div_euclid(12)).map_err(|_| out_of_range())?;
    let month_number = u8::try_from(month_index.rem_euclid(12) + 1).map_err(|_| out_of_range())?;
    let month = Month::try_from(month_number).map_err(|_| out_of_range())?;
    let day = utc.day().min(days_in_month(year, month));
    let date = Date::from_calendar_date(year, month, day).map_err(|_| out_of_range())?;
    Ok(date.with_time(utc.time()).assume_utc())
}

/// Returns the number of days in the given month.
const fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::February => {
            if time::util::is_leap_year(year) {
                29
            } else {
                28
            }
        }
        Month::April | Month::June | Month::September | Month::November => 30,
        _ => 31,
    }
}

// ============================================================================
// SECTION: Windows
// ============================================================================

/// Splits the eligible span into quarter-aligned windows.
///
/// `earliest` and `latest` are the oldest and newest time values observed
/// below `cutoff`. Windows run from the quarter containing `earliest` through
/// the quarter containing `latest`; the final window ends at `cutoff` when
/// the cutoff falls inside it. Returns no windows when nothing is eligible.
///
/// # Errors
///
/// Returns [`QuarterError::OutOfRange`] when a quarter boundary is
/// unrepresentable.
pub fn quarter_windows(
    earliest: OffsetDateTime,
    latest: OffsetDateTime,
    cutoff: OffsetDateTime,
) -> Result<Vec<QuarterRange>, QuarterError> {
    if earliest >= cutoff || latest < earliest {
        return Ok(Vec::new());
    }
    let upper = if latest < cutoff { latest } else { cutoff };
    let last = QuarterKey::containing(upper);
    let mut key = QuarterKey::containing(earliest);
    let mut ranges = Vec::new();
    loop {
        let start = key.start()?;
        if start >= cutoff {
            break;
        }
        let next = key.next()?;
        let next_start = next.start()?;
        let end = if next_start < cutoff { next_start } else { cutoff };
        ranges.push(QuarterRange {
            quarter: key,
            start,
            end,
        });
        if key >= last {
            break;
        }
        key = next;
    }
    Ok(ranges)
}
