// crates/quarry-store-sqlite/src/time_field.rs
// ============================================================================
// Module: Time Field Encoding
// Description: SQL expressions and bound values for each time field kind.
// Purpose: Compare rows against quarter windows in the column's own encoding.
// Dependencies: rusqlite, time
// ============================================================================

//! ## Overview
//! Epoch-second and epoch-millisecond columns compare numerically against
//! integer bounds. Text columns are rewritten in SQL first: surrounding
//! whitespace is trimmed, `/` date separators become `-`, and a compact
//! `+HHMM` offset gains its colon. The result goes through `SQLite`'s
//! `datetime()`, which folds `T`/space separators, fractional seconds, `Z`,
//! and numeric offsets into the canonical `YYYY-MM-DD HH:MM:SS` UTC form.
//! Window bounds are rendered in that same form so string comparison is
//! chronological, and archived rows store the canonical text.
//!
//! [`parse_timestamp`] accepts exactly the grammar the SQL side reads. Text
//! outside it evaluates to `NULL` in SQL, is never eligible, and is counted
//! as unreadable so runs can report it instead of skipping rows silently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use quarry_core::TimeFieldKind;
use rusqlite::types::Value;
use time::Date;
use time::Duration;
use time::Month;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::Time;
use time::UtcOffset;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::ArchiveStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Canonical text form produced by `SQLite`'s `datetime()`.
const CANONICAL: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Nanoseconds per millisecond.
const NANOS_PER_MILLI: i128 = 1_000_000;

/// Characters `SQLite` treats as whitespace, as a SQL string expression.
const SQL_SPACES: &str = "' ' || char(9, 10, 11, 12, 13)";

/// Largest offset hour `SQLite` accepts.
const MAX_OFFSET_HOURS: u32 = 14;

// ============================================================================
// SECTION: SQL Fragments
// ============================================================================

/// Returns the expression compared against window bounds.
///
/// `column` must already be quoted and qualified.
pub(crate) fn time_comparison_expression(kind: TimeFieldKind, column: &str) -> String {
    match kind {
        TimeFieldKind::EpochSeconds | TimeFieldKind::EpochMillis => column.to_string(),
        TimeFieldKind::Text => {
            let text = format!("trim(replace({column}, '/', '-'), {SQL_SPACES})");
            format!(
                "datetime(CASE WHEN {text} NOT GLOB '[0-9][0-9][0-9][0-9]-*' THEN NULL WHEN \
                 {text} GLOB '*[+-][0-9][0-9][0-9][0-9]' THEN substr({text}, 1, length({text}) - \
                 2) || ':' || substr({text}, -2) ELSE {text} END)"
            )
        }
    }
}

/// Returns the expression written into the archive for the time column.
///
/// Text values are stored in canonical form so archive queries compare
/// chronologically without re-normalizing.
pub(crate) fn time_storage_expression(kind: TimeFieldKind, column: &str) -> String {
    time_comparison_expression(kind, column)
}

/// Returns a predicate matching rows whose time value cannot be read.
///
/// Only text fields can be unreadable.
pub(crate) fn unreadable_time_predicate(kind: TimeFieldKind, column: &str) -> Option<String> {
    match kind {
        TimeFieldKind::EpochSeconds | TimeFieldKind::EpochMillis => None,
        TimeFieldKind::Text => Some(format!(
            "{column} IS NOT NULL AND {} IS NULL",
            time_comparison_expression(kind, column)
        )),
    }
}

/// Returns the expression used to read a row's time value back.
pub(crate) fn time_value_expression(kind: TimeFieldKind, column: &str) -> String {
    match kind {
        TimeFieldKind::EpochSeconds | TimeFieldKind::EpochMillis => {
            format!("CAST({column} AS INTEGER)")
        }
        TimeFieldKind::Text => time_comparison_expression(kind, column),
    }
}

/// Renders a window bound in the column's comparison domain.
pub(crate) fn time_bound(
    kind: TimeFieldKind,
    instant: OffsetDateTime,
) -> Result<Value, ArchiveStoreError> {
    match kind {
        TimeFieldKind::EpochSeconds => Ok(Value::Integer(instant.unix_timestamp())),
        TimeFieldKind::EpochMillis => {
            let millis = instant.unix_timestamp_nanos().div_euclid(NANOS_PER_MILLI);
            i64::try_from(millis).map(Value::Integer).map_err(|_| {
                ArchiveStoreError::Invalid("millisecond bound exceeds i64 range".to_string())
            })
        }
        TimeFieldKind::Text => format_canonical(instant).map(Value::Text),
    }
}

/// Decodes a value produced by [`time_value_expression`].
pub(crate) fn decode_time(
    kind: TimeFieldKind,
    value: &Value,
) -> Result<Option<OffsetDateTime>, ArchiveStoreError> {
    match (kind, value) {
        (_, Value::Null) => Ok(None),
        (TimeFieldKind::EpochSeconds, Value::Integer(seconds)) => {
            OffsetDateTime::from_unix_timestamp(*seconds)
                .map(Some)
                .map_err(|err| ArchiveStoreError::Invalid(format!("epoch seconds {seconds}: {err}")))
        }
        (TimeFieldKind::EpochMillis, Value::Integer(millis)) => {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(*millis) * NANOS_PER_MILLI)
                .map(Some)
                .map_err(|err| ArchiveStoreError::Invalid(format!("epoch millis {millis}: {err}")))
        }
        (TimeFieldKind::Text, Value::Text(text)) => parse_timestamp(text).map(Some),
        (kind, other) => Err(ArchiveStoreError::Invalid(format!(
            "unexpected {} time value of type {}",
            kind.as_str(),
            other.data_type()
        ))),
    }
}

// ============================================================================
// SECTION: Text Timestamps
// ============================================================================

/// Formats an instant as canonical `YYYY-MM-DD HH:MM:SS` UTC text.
///
/// # Errors
///
/// Returns [`ArchiveStoreError::Invalid`] for years outside `0000-9999`.
pub fn format_canonical(instant: OffsetDateTime) -> Result<String, ArchiveStoreError> {
    instant
        .to_offset(UtcOffset::UTC)
        .format(CANONICAL)
        .map_err(|err| ArchiveStoreError::Invalid(format!("timestamp format: {err}")))
}

/// Parses a date or date-time string tolerantly, returning a UTC instant.
///
/// Accepted shapes: `YYYY-MM-DD` or `YYYY/MM/DD`, optionally followed by
/// `T` or whitespace and `HH:MM[:SS[.fraction]]`, optionally followed by `Z`
/// or a `+HH:MM`/`+HHMM` offset of at most 14 hours. Missing offsets mean
/// UTC. Fields are fixed width; days past the end of a month and hour `24`
/// roll forward. This matches what archive runs read from text columns, so
/// a value parses here exactly when its row can be placed in a window.
///
/// # Errors
///
/// Returns [`ArchiveStoreError::Invalid`] when the text matches none of these.
pub fn parse_timestamp(text: &str) -> Result<OffsetDateTime, ArchiveStoreError> {
    parse_lenient(text.trim_matches(is_sql_space))
        .ok_or_else(|| ArchiveStoreError::Invalid(format!("unrecognized timestamp: {text}")))
}

/// Parser behind [`parse_timestamp`]; `text` is already trimmed.
fn parse_lenient(text: &str) -> Option<OffsetDateTime> {
    let date = parse_date(text.get(..10)?)?;
    let rest = text.get(10..)?.trim_start_matches(|ch: char| ch == 'T' || is_sql_space(ch));
    if rest.is_empty() {
        return Some(date.midnight().assume_utc());
    }
    let (clock, offset) = split_offset(rest)?;
    let (time, carry) = parse_clock(clock)?;
    let local = PrimitiveDateTime::new(date, time).checked_add(carry)?;
    Some(local.assume_offset(offset).to_offset(UtcOffset::UTC))
}

/// Parses `YYYY-MM-DD` or `YYYY/MM/DD`; days 29-31 overflow into the next month.
fn parse_date(value: &str) -> Option<Date> {
    let bytes = value.as_bytes();
    if !matches!(bytes.get(4), Some(b'-' | b'/')) || !matches!(bytes.get(7), Some(b'-' | b'/')) {
        return None;
    }
    let year = i32::try_from(fixed_digits(value.get(..4)?)?).ok()?;
    let month = u8::try_from(fixed_digits(value.get(5..7)?)?).ok()?;
    let day = fixed_digits(value.get(8..10)?)?;
    if !(1..=31).contains(&day) {
        return None;
    }
    let first = Date::from_calendar_date(year, Month::try_from(month).ok()?, 1).ok()?;
    first.checked_add(Duration::days(i64::from(day - 1)))
}

/// Splits a trailing `Z` or numeric offset from the clock text.
fn split_offset(value: &str) -> Option<(&str, UtcOffset)> {
    if let Some(clock) = value.strip_suffix(['Z', 'z']) {
        return Some((clock.trim_end_matches(is_sql_space), UtcOffset::UTC));
    }
    let Some(index) = value.rfind(['+', '-']) else {
        return Some((value, UtcOffset::UTC));
    };
    let (clock, offset) = value.split_at(index);
    let digits = offset.get(1..)?;
    let (hours, minutes) = match digits.as_bytes() {
        [_, _, b':', _, _] => (digits.get(..2)?, digits.get(3..)?),
        [_, _, _, _] => (digits.get(..2)?, digits.get(2..)?),
        _ => return None,
    };
    let hours = fixed_digits(hours)?;
    let minutes = fixed_digits(minutes)?;
    if hours > MAX_OFFSET_HOURS || minutes > 59 {
        return None;
    }
    let seconds = i32::try_from(hours * 3600 + minutes * 60).ok()?;
    let seconds = if offset.starts_with('-') { -seconds } else { seconds };
    Some((clock.trim_end_matches(is_sql_space), UtcOffset::from_whole_seconds(seconds).ok()?))
}

/// Parses `HH:MM`, `HH:MM:SS`, or `HH:MM:SS.fraction` with two-digit fields.
///
/// Fractions round to the nearest millisecond. Hour `24` and a fraction
/// that rounds up to a whole second come back as a carry to add.
fn parse_clock(value: &str) -> Option<(Time, Duration)> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };
    let mut parts = whole.split(':');
    let hour = fixed_digits(parts.next()?)?;
    let minute = u8::try_from(fixed_digits(parts.next()?)?).ok()?;
    let second = match parts.next() {
        Some(second) => Some(u8::try_from(fixed_digits(second)?).ok()?),
        None => None,
    };
    if parts.next().is_some() || (fraction.is_some() && second.is_none()) {
        return None;
    }
    let millis = match fraction {
        Some(fraction) => round_millis(fraction)?,
        None => 0,
    };
    let mut carry = Duration::ZERO;
    let hour = if hour == 24 {
        carry += Duration::DAY;
        0
    } else {
        u8::try_from(hour).ok()?
    };
    let millis = if millis == 1000 {
        carry += Duration::SECOND;
        0
    } else {
        u16::try_from(millis).ok()?
    };
    let time = Time::from_hms_milli(hour, minute, second.unwrap_or(0), millis).ok()?;
    Some((time, carry))
}

/// Parses an all-digit field of two or four characters.
fn fixed_digits(value: &str) -> Option<u32> {
    if !matches!(value.len(), 2 | 4) || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Returns true for the characters `SQLite` treats as whitespace.
const fn is_sql_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\u{0b}' | '\u{0c}' | '\r')
}

/// Rounds fractional-second digits half-up to milliseconds (`0..=1000`).
fn round_millis(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let mut padded: String = digits.chars().take(4).collect();
    while padded.len() < 4 {
        padded.push('0');
    }
    let tenths_of_millis: u32 = padded.parse().ok()?;
    Some((tenths_of_millis + 5) / 10)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
