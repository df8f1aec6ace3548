// crates/quarry-core/src/audit.rs
// ============================================================================
// Module: Archive Audit Logging
// Description: Structured log events and execution result sinks.
// Purpose: Emit JSON-lines records without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Quarry has no interactive surface; everything an operator learns about a
//! run arrives through an [`ArchiveAuditSink`]. Sinks receive two record
//! kinds: free-form [`ArchiveEvent`]s (progress, warnings, failures) and one
//! [`ExecutionResult`] per table per run. The stock sinks serialize each
//! record as a single JSON line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;

use crate::result::ExecutionResult;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Severity attached to an archive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Routine progress.
    Info,
    /// Degraded but non-fatal condition.
    Warn,
    /// Failure of a table run, lock, or cleanup.
    Error,
}

/// Structured archive log event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveEvent {
    /// Stable event identifier (for example `batch_committed`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Event severity.
    pub level: EventLevel,
    /// Table the event concerns, when any.
    pub table: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ArchiveEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        level: EventLevel,
        event: &'static str,
        table: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            level,
            table: table.map(str::to_string),
            message: message.into(),
            detail: None,
        }
    }

    /// Creates an info-level event.
    #[must_use]
    pub fn info(event: &'static str, table: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, event, table, message)
    }

    /// Creates a warn-level event.
    #[must_use]
    pub fn warn(event: &'static str, table: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, event, table, message)
    }

    /// Creates an error-level event.
    #[must_use]
    pub fn error(event: &'static str, table: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, event, table, message)
    }

    /// Attaches structured detail to the event.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Sink for archive events and per-table execution results.
pub trait ArchiveAuditSink: Send + Sync {
    /// Record a log event.
    fn record(&self, event: &ArchiveEvent);

    /// Record a per-table execution result.
    fn record_result(&self, _result: &ExecutionResult) {}
}

/// Result record wrapper giving results a stable event name on the wire.
#[derive(Serialize)]
struct ResultLine<'a> {
    /// Event identifier.
    event: &'static str,
    /// Wrapped result.
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

impl<'a> ResultLine<'a> {
    /// Wraps a result for serialization.
    const fn new(result: &'a ExecutionResult) -> Self {
        Self {
            event: "execution_result",
            result,
        }
    }
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl ArchiveAuditSink for StderrAuditSink {
    fn record(&self, event: &ArchiveEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }

    fn record_result(&self, result: &ExecutionResult) {
        if let Ok(payload) = serde_json::to_string(&ResultLine::new(result)) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one serialized line.
    fn write_line(&self, payload: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl ArchiveAuditSink for FileAuditSink {
    fn record(&self, event: &ArchiveEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.write_line(&payload);
        }
    }

    fn record_result(&self, result: &ExecutionResult) {
        if let Ok(payload) = serde_json::to_string(&ResultLine::new(result)) {
            self.write_line(&payload);
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl ArchiveAuditSink for NoopAuditSink {
    fn record(&self, _event: &ArchiveEvent) {}

    fn record_result(&self, _result: &ExecutionResult) {}
}

/// Audit sink that keeps records in memory, for tests and embedders.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events, in arrival order.
    events: Mutex<Vec<ArchiveEvent>>,
    /// Recorded results, in arrival order.
    results: Mutex<Vec<ExecutionResult>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ArchiveEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the recorded event names, in arrival order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.event).collect()
    }

    /// Returns a snapshot of the recorded results.
    #[must_use]
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results.lock().map(|results| results.clone()).unwrap_or_default()
    }
}

impl ArchiveAuditSink for MemoryAuditSink {
    fn record(&self, event: &ArchiveEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn record_result(&self, result: &ExecutionResult) {
        if let Ok(mut results) = self.results.lock() {
            results.push(result.clone());
        }
    }
}
