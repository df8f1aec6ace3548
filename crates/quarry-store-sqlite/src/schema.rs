// crates/quarry-store-sqlite/src/schema.rs
// ============================================================================
// Module: Archive Schema Synchronizer
// Description: Creates archive tables and aligns them additively with sources.
// Purpose: Keep every archive table able to receive the source's columns.
// Dependencies: quarry-core, rusqlite, serde, serde_json
// ============================================================================

//! ## Overview
//! Archive tables mirror their source tables column for column. A missing
//! archive table is created from the source's `table_info`: declared types,
//! `NOT NULL`, static defaults, and a table-level primary key in key order.
//! Dynamic defaults (`CURRENT_TIMESTAMP`, function calls, parenthesised
//! expressions) are dropped, since archived rows always carry explicit values.
//!
//! An existing archive table is only ever extended: source columns it lacks
//! are appended with `ALTER TABLE ... ADD COLUMN`. Columns are never altered,
//! renamed, or dropped. A new column that cannot be added as declared
//! (`NOT NULL` without a static default, or primary key membership) is added
//! as a nullable column and reported as relaxed.
//!
//! Security posture: table names must be allow-listed [`Identifier`]s; column
//! names and types come from `SQLite`'s own catalog and are quoted or
//! character-checked before interpolation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use quarry_core::ArchiveAuditSink;
use quarry_core::ArchiveEvent;
use quarry_core::Identifier;
use quarry_core::TableAllowList;
use quarry_core::table::quote_identifier;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::connection::SqliteStoreConfig;
use crate::connection::open_archive_connection;
use crate::error::ArchiveStoreError;
use crate::error::db_error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type text (may be empty).
    pub declared_type: String,
    /// Whether the column is declared `NOT NULL`.
    pub not_null: bool,
    /// Default expression text, when declared.
    pub default_value: Option<String>,
    /// 1-based position in the primary key, or 0 when not a key column.
    pub primary_key_position: u32,
}

impl ColumnInfo {
    /// Returns the default when it is a constant literal.
    #[must_use]
    pub fn static_default(&self) -> Option<&str> {
        self.default_value.as_deref().map(str::trim).filter(|value| is_static_default(value))
    }
}

/// Outcome of aligning one archive table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SchemaSyncOutcome {
    /// The archive table did not exist and was created.
    Created,
    /// Missing columns were appended.
    Aligned {
        /// Columns appended to the archive table.
        added: Vec<String>,
        /// Appended columns whose constraints were relaxed to nullable.
        relaxed: Vec<String>,
    },
    /// The archive table already had every source column.
    Unchanged,
}

// ============================================================================
// SECTION: Introspection
// ============================================================================

/// Reads the column list of `schema.table`.
///
/// Returns an empty list when the table does not exist in that schema.
///
/// # Errors
///
/// Returns [`ArchiveStoreError`] when the pragma cannot be evaluated.
pub fn read_source_columns(
    connection: &Connection,
    schema: &str,
    table: &Identifier,
) -> Result<Vec<ColumnInfo>, ArchiveStoreError> {
    let sql = format!("PRAGMA {}.table_info({})", quote_identifier(schema), table.quoted());
    let mut stmt = connection.prepare(&sql).map_err(db_error)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .map_err(db_error)?;
    let mut columns = Vec::new();
    for row in rows {
        let (name, declared_type, not_null, default_value, pk) = row.map_err(db_error)?;
        let primary_key_position = u32::try_from(pk).map_err(|_| {
            ArchiveStoreError::Schema(format!("invalid primary key position for {name}"))
        })?;
        columns.push(ColumnInfo {
            name,
            declared_type: declared_type.unwrap_or_default(),
            not_null: not_null != 0,
            default_value,
            primary_key_position,
        });
    }
    Ok(columns)
}

// ============================================================================
// SECTION: Synchronizer
// ============================================================================

/// Creates and additively aligns archive tables.
#[derive(Clone)]
pub struct SchemaSynchronizer {
    /// Tables that may be created or altered.
    allow_list: TableAllowList,
    /// Audit sink for schema events.
    sink: Arc<dyn ArchiveAuditSink>,
}

impl SchemaSynchronizer {
    /// Creates a synchronizer restricted to `allow_list`.
    #[must_use]
    pub fn new(allow_list: TableAllowList, sink: Arc<dyn ArchiveAuditSink>) -> Self {
        Self {
            allow_list,
            sink,
        }
    }

    /// Opens the archive at `archive_path` and aligns `table` with
    /// `source_columns`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError`] when the archive cannot be opened or
    /// aligned.
    pub fn ensure_table_at(
        &self,
        archive_path: &Path,
        config: &SqliteStoreConfig,
        table: &Identifier,
        source_columns: &[ColumnInfo],
    ) -> Result<SchemaSyncOutcome, ArchiveStoreError> {
        let connection = open_archive_connection(archive_path, config)?;
        self.ensure_table(&connection, table, source_columns)
    }

    /// Aligns `table` in the connection's `main` schema with `source_columns`.
    ///
    /// Idempotent: a second call with the same columns returns
    /// [`SchemaSyncOutcome::Unchanged`].
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveStoreError::Invalid`] for tables outside the
    /// allow-list and [`ArchiveStoreError::Schema`] when the table cannot be
    /// created or extended.
    pub fn ensure_table(
        &self,
        connection: &Connection,
        table: &Identifier,
        source_columns: &[ColumnInfo],
    ) -> Result<SchemaSyncOutcome, ArchiveStoreError> {
        self.allow_list.check(table)?;
        if source_columns.is_empty() {
            return Err(ArchiveStoreError::Schema(format!("no source columns for {table}")));
        }
        for column in source_columns {
            validate_declared_type(&column.declared_type)?;
        }
        let existing = read_source_columns(connection, "main", table)?;
        let tx = connection.unchecked_transaction().map_err(db_error)?;
        let outcome = if existing.is_empty() {
            tx.execute_batch(&create_table_sql(table, source_columns))
                .map_err(|err| ArchiveStoreError::Schema(format!("create {table}: {err}")))?;
            SchemaSyncOutcome::Created
        } else {
            let present: BTreeSet<String> =
                existing.iter().map(|column| column.name.to_ascii_lowercase()).collect();
            let mut added = Vec::new();
            let mut relaxed = Vec::new();
            for column in source_columns {
                if present.contains(&column.name.to_ascii_lowercase()) {
                    continue;
                }
                let (definition, was_relaxed) = added_column_definition(column);
                let sql = format!("ALTER TABLE {} ADD COLUMN {definition}", table.quoted());
                tx.execute_batch(&sql).map_err(|err| {
                    ArchiveStoreError::Schema(format!("add column {}.{}: {err}", table, column.name))
                })?;
                added.push(column.name.clone());
                if was_relaxed {
                    relaxed.push(column.name.clone());
                }
            }
            if added.is_empty() {
                SchemaSyncOutcome::Unchanged
            } else {
                SchemaSyncOutcome::Aligned {
                    added,
                    relaxed,
                }
            }
        };
        tx.commit().map_err(db_error)?;
        self.record_outcome(table, &outcome);
        Ok(outcome)
    }

    /// Emits audit events for a committed outcome.
    fn record_outcome(&self, table: &Identifier, outcome: &SchemaSyncOutcome) {
        match outcome {
            SchemaSyncOutcome::Created => {
                self.sink.record(&ArchiveEvent::info(
                    "schema_table_created",
                    Some(table.as_str()),
                    "archive table created",
                ));
            }
            SchemaSyncOutcome::Aligned {
                added,
                relaxed,
            } => {
                self.sink.record(
                    &ArchiveEvent::info(
                        "schema_columns_added",
                        Some(table.as_str()),
                        format!("added {} archive column(s)", added.len()),
                    )
                    .with_detail(json!({ "columns": added })),
                );
                for column in relaxed {
                    self.sink.record(
                        &ArchiveEvent::warn(
                            "schema_column_relaxed",
                            Some(table.as_str()),
                            format!("column {column} added as nullable"),
                        )
                        .with_detail(json!({ "column": column })),
                    );
                }
            }
            SchemaSyncOutcome::Unchanged => {}
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the `CREATE TABLE` statement mirroring `columns`.
fn create_table_sql(table: &Identifier, columns: &[ColumnInfo]) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut definition = base_definition(column);
            if column.not_null {
                definition.push_str(" NOT NULL");
            }
            if let Some(default) = column.static_default() {
                definition.push_str(" DEFAULT ");
                definition.push_str(default);
            }
            definition
        })
        .collect();
    let mut key: Vec<&ColumnInfo> =
        columns.iter().filter(|column| column.primary_key_position > 0).collect();
    key.sort_by_key(|column| column.primary_key_position);
    if !key.is_empty() {
        let names: Vec<String> = key.iter().map(|column| quote_identifier(&column.name)).collect();
        definitions.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table.quoted(), definitions.join(", "))
}

/// Builds an `ADD COLUMN` definition; returns whether it was relaxed.
fn added_column_definition(column: &ColumnInfo) -> (String, bool) {
    let mut definition = base_definition(column);
    let default = column.static_default();
    let relaxed = column.primary_key_position > 0
        || (column.not_null && default.is_none_or(|value| value.eq_ignore_ascii_case("NULL")));
    if column.not_null && !relaxed {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = default {
        definition.push_str(" DEFAULT ");
        definition.push_str(default);
    }
    (definition, relaxed)
}

/// Quoted name followed by the declared type, if any.
fn base_definition(column: &ColumnInfo) -> String {
    let name = quote_identifier(&column.name);
    let declared = column.declared_type.trim();
    if declared.is_empty() { name } else { format!("{name} {declared}") }
}

/// Rejects declared types containing characters outside type-name syntax.
fn validate_declared_type(declared: &str) -> Result<(), ArchiveStoreError> {
    let valid = declared.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '_' | '(' | ')' | ',' | '+' | '-' | '.')
    });
    if valid {
        Ok(())
    } else {
        Err(ArchiveStoreError::Schema(format!("unsupported declared type: {declared}")))
    }
}

/// Returns true when `value` is a constant literal default.
fn is_static_default(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if ["NULL", "TRUE", "FALSE"].iter().any(|keyword| value.eq_ignore_ascii_case(keyword)) {
        return true;
    }
    if let Some(body) = value.strip_prefix(['x', 'X']) {
        return is_string_literal(body)
            && body.len() % 2 == 0
            && body[1..body.len() - 1].bytes().all(|byte| byte.is_ascii_hexdigit());
    }
    is_string_literal(value) || is_numeric_literal(value)
}

/// Returns true for a single complete `'...'` literal with `''` escapes.
fn is_string_literal(value: &str) -> bool {
    let Some(inner) = value.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) else {
        return false;
    };
    !inner.replace("''", "").contains('\'')
}

/// Returns true for signed integer, decimal, exponent, or hex literals.
fn is_numeric_literal(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    if let Some(hex) = unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X")) {
        return !hex.is_empty() && hex.bytes().all(|byte| byte.is_ascii_hexdigit());
    }
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(index) => (&unsigned[..index], Some(&unsigned[index + 1..])),
        None => (unsigned, None),
    };
    let mut parts = mantissa.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits(whole) || !digits(fraction) {
        return false;
    }
    match exponent {
        None => true,
        Some(exponent) => {
            let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !exponent.is_empty() && digits(exponent)
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
