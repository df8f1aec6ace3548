// crates/quarry-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Archive Store
// Description: SQLite backend for quarterly row archival.
// Purpose: Move aged rows from hot SQLite tables into per-quarter archives.
// Dependencies: quarry-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate implements [`quarry_core::TableArchiver`] on top of `SQLite`.
//! Each archive quarter is its own database file. Rows move in bounded
//! batches inside one transaction spanning the archive file and the attached
//! source database, with affected-row counts verified before commit.
//! Archive tables are created from, and additively aligned with, the source
//! table definitions.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod connection;
pub mod engine;
pub mod error;
pub mod schema;
pub mod time_field;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use connection::DEFAULT_BUSY_TIMEOUT_MS;
pub use connection::SqliteStoreConfig;
pub use connection::SqliteStoreMode;
pub use connection::SqliteSyncMode;
pub use engine::BatchOutcome;
pub use engine::DEFAULT_BATCH_DELAY;
pub use engine::DEFAULT_BATCH_SIZE;
pub use engine::DEFAULT_BATCH_TIMEOUT;
pub use engine::EngineSettings;
pub use engine::MAX_BATCH_DELAY;
pub use engine::MAX_BATCH_SIZE;
pub use engine::SqliteArchiveEngine;
pub use engine::TablePlan;
pub use error::ArchiveStoreError;
pub use schema::ColumnInfo;
pub use schema::SchemaSyncOutcome;
pub use schema::SchemaSynchronizer;
pub use schema::read_source_columns;
pub use time_field::format_canonical;
pub use time_field::parse_timestamp;
