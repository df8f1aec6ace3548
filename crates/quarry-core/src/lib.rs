// crates/quarry-core/src/lib.rs
// ============================================================================
// Module: Quarry Core
// Description: Backend-neutral building blocks for quarterly row archival.
// Purpose: Share quarter math, archive layout, locking, and run coordination.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Quarry moves aged rows out of hot single-writer tables into one cold
//! archive store per UTC calendar quarter. This crate holds everything that
//! does not depend on a concrete storage engine: quarter keys and windows,
//! the on-disk archive layout and its retention cleanup, the cross-process
//! execution lock, structured audit sinks, and the [`Coordinator`] that runs
//! a [`TableArchiver`] over every configured table.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod coordinator;
pub mod lock;
pub mod locator;
pub mod quarter;
pub mod result;
pub mod table;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::ArchiveAuditSink;
pub use audit::ArchiveEvent;
pub use audit::EventLevel;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use coordinator::Coordinator;
pub use coordinator::RunReport;
pub use coordinator::RunStatus;
pub use coordinator::TableArchiver;
pub use coordinator::prune_archives;
pub use lock::DEFAULT_LOCK_STALE_AFTER;
pub use lock::ExecutionLock;
pub use lock::ExecutionLockGuard;
pub use lock::LockAcquisition;
pub use lock::LockError;
pub use locator::ArchiveLayout;
pub use locator::LocatorError;
pub use quarter::DEFAULT_RETENTION_MONTHS;
pub use quarter::QuarterError;
pub use quarter::QuarterKey;
pub use quarter::QuarterRange;
pub use quarter::quarter_key;
pub use quarter::quarter_windows;
pub use quarter::retention_cutoff;
pub use result::ExecutionResult;
pub use result::ResultAccumulator;
pub use table::Identifier;
pub use table::IdentifierError;
pub use table::TableAllowList;
pub use table::TableSpec;
pub use table::TimeFieldKind;
