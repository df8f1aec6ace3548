// crates/quarry-cli/src/main.rs
// ============================================================================
// Module: Quarry CLI Entry Point
// Description: Command dispatcher for archival runs, plans, and cleanup.
// Purpose: Give cron and systemd timers a single trigger for Quarry.
// Dependencies: clap, quarry-config, quarry-core, quarry-store-sqlite, serde_json
// ============================================================================

//! ## Overview
//! `quarry` is the external trigger for archival runs. Every command loads
//! `quarry.toml` (explicit `--config`, else `QUARRY_CONFIG`, else the working
//! directory), does its work, and prints one JSON document on stdout. Log
//! events go to the configured audit sink, which defaults to stderr.
//!
//! Exit codes: `0` success, a skipped run, or a run whose only problem was
//! archive cleanup (reported as `cleanup_error` in the JSON); `1` usage or
//! configuration failure; `2` one or more tables failed; `3` the execution
//! lock could not be taken.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::error::ErrorKind;
use quarry_config::QuarryConfig;
use quarry_core::ArchiveAuditSink;
use quarry_core::ArchiveEvent;
use quarry_core::ArchiveLayout;
use quarry_core::Coordinator;
use quarry_core::LockAcquisition;
use quarry_core::RunReport;
use quarry_core::RunStatus;
use quarry_core::prune_archives;
use quarry_store_sqlite::SqliteArchiveEngine;
use quarry_store_sqlite::parse_timestamp;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Usage or configuration failure.
const EXIT_CONFIG: u8 = 1;
/// At least one table failed.
const EXIT_TABLE_FAILED: u8 = 2;
/// Lock acquisition failed.
const EXIT_RUN_FAILED: u8 = 3;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "quarry", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Path to quarry.toml (overrides `QUARRY_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive every configured table, then prune old archives.
    Run(ClockArgs),
    /// Show what a run would move without touching any rows.
    Plan(PlanCommand),
    /// Prune archive files beyond the configured retention.
    Cleanup,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Reference clock override.
#[derive(Args, Debug)]
struct ClockArgs {
    /// Evaluate retention relative to this instant instead of the wall clock.
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<String>,
}

/// Arguments for `plan`.
#[derive(Args, Debug)]
struct PlanCommand {
    /// Reference clock override.
    #[command(flatten)]
    clock: ClockArgs,
    /// Restrict the plan to one configured table.
    #[arg(long, value_name = "NAME")]
    table: Option<String>,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration.
    Validate,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a printable message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return Ok(report_parse_error(&err)),
    };
    if cli.show_version {
        write_stdout_line(&format!("quarry {}", env!("CARGO_PKG_VERSION")))?;
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        return Err(CliError::new("no command given; try `quarry --help`".to_string()));
    };
    let config = load_config(cli.config)?;
    match command {
        Commands::Run(clock) => command_run(&config, &clock),
        Commands::Plan(command) => command_plan(&config, &command),
        Commands::Cleanup => command_cleanup(&config),
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(&config),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `run` command.
fn command_run(config: &QuarryConfig, clock: &ClockArgs) -> CliResult<ExitCode> {
    let now = clock.now.as_deref().map(parse_now).transpose()?;
    let sink = config.build_sink().map_err(|err| CliError::new(err.to_string()))?;
    let engine = open_engine(config, Arc::clone(&sink))?;
    let coordinator = Coordinator::new(
        engine,
        config.table_specs(),
        config.archive_layout(),
        config.execution_lock(),
        config.archive.retention_quarters,
        sink,
    );
    let report = match now {
        Some(now) => coordinator.run(now),
        None => coordinator.run_now(),
    };
    write_json(&report)?;
    Ok(ExitCode::from(run_exit_code(&report)))
}

/// Executes the `plan` command; also lists the archive files on disk.
fn command_plan(config: &QuarryConfig, command: &PlanCommand) -> CliResult<ExitCode> {
    let now = resolve_now(command.clock.now.as_deref())?;
    let sink = config.build_sink().map_err(|err| CliError::new(err.to_string()))?;
    let engine = open_engine(config, sink)?;
    let tables: Vec<_> = match &command.table {
        Some(name) => {
            let selected: Vec<_> =
                engine.tables().iter().filter(|table| table.name.as_str() == name).cloned().collect();
            if selected.is_empty() {
                return Err(CliError::new(format!("table is not configured: {name}")));
            }
            selected
        }
        None => engine.tables().to_vec(),
    };
    let mut plans = Vec::with_capacity(tables.len());
    for table in &tables {
        let plan = engine
            .plan_table(table, now)
            .map_err(|err| CliError::new(format!("plan {} failed: {err}", table.name)))?;
        plans.push(plan);
    }
    let archives: Vec<String> = config
        .archive_layout()
        .list_archives()
        .map_err(|err| CliError::new(format!("failed to list archives: {err}")))?
        .into_iter()
        .map(ArchiveLayout::file_name)
        .collect();
    write_json(&json!({ "now": format_now(now)?, "tables": plans, "archives": archives }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `cleanup` command under the execution lock.
fn command_cleanup(config: &QuarryConfig) -> CliResult<ExitCode> {
    let sink = config.build_sink().map_err(|err| CliError::new(err.to_string()))?;
    let lock = config.execution_lock();
    let guard = match lock.try_acquire() {
        Ok(LockAcquisition::Acquired(guard)) => guard,
        Ok(LockAcquisition::Contended {
            holder_pid,
            ..
        }) => {
            write_json(&json!({ "status": RunStatus::SkippedLockHeld, "holder_pid": holder_pid }))?;
            return Ok(ExitCode::SUCCESS);
        }
        Err(err) => {
            write_json(&json!({ "status": RunStatus::Aborted, "lock_error": err.to_string() }))?;
            return Ok(ExitCode::from(EXIT_RUN_FAILED));
        }
    };
    let (deleted, cleanup_error) = prune_archives(
        &config.archive_layout(),
        config.archive.retention_quarters,
        sink.as_ref(),
    );
    if let Err(err) = guard.release() {
        sink.record(&ArchiveEvent::warn(
            "lock_release_failed",
            None,
            format!("failed to release execution lock: {err}"),
        ));
    }
    write_json(&json!({
        "status": RunStatus::Completed,
        "cleaned_archives": deleted,
        "cleanup_error": cleanup_error,
    }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the config validation command.
fn command_config_validate(config: &QuarryConfig) -> CliResult<ExitCode> {
    let tables: Vec<&str> = config.tables.iter().map(|table| table.name.as_str()).collect();
    write_json(&json!({
        "status": "ok",
        "source": config.source.path.display().to_string(),
        "archive_directory": config.archive.directory.display().to_string(),
        "lock_target": config.lock_target().display().to_string(),
        "retention_quarters": config.archive.retention_quarters,
        "tables": tables,
    }))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads configuration, mapping failures to a CLI error.
fn load_config(path: Option<PathBuf>) -> CliResult<QuarryConfig> {
    QuarryConfig::load(path.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Opens the `SQLite` engine described by the configuration.
fn open_engine(
    config: &QuarryConfig,
    sink: Arc<dyn ArchiveAuditSink>,
) -> CliResult<SqliteArchiveEngine> {
    SqliteArchiveEngine::open(
        config.source.clone(),
        config.archive_layout(),
        config.table_specs(),
        config.engine_settings(),
        sink,
    )
    .map_err(|err| CliError::new(format!("failed to open source database: {err}")))
}

/// Resolves the reference clock from `--now` or the wall clock.
fn resolve_now(raw: Option<&str>) -> CliResult<OffsetDateTime> {
    raw.map_or_else(|| Ok(OffsetDateTime::now_utc()), parse_now)
}

/// Parses a `--now` override.
fn parse_now(raw: &str) -> CliResult<OffsetDateTime> {
    parse_timestamp(raw).map_err(|err| CliError::new(format!("invalid --now: {err}")))
}

/// Formats the reference clock for output.
fn format_now(now: OffsetDateTime) -> CliResult<String> {
    now.format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| CliError::new(format!("failed to format time: {err}")))
}

/// Maps a run report to the process exit code.
fn run_exit_code(report: &RunReport) -> u8 {
    match report.status {
        RunStatus::SkippedLockHeld => 0,
        RunStatus::Aborted => EXIT_RUN_FAILED,
        RunStatus::Completed if report.results.iter().any(|result| !result.success) => {
            EXIT_TABLE_FAILED
        }
        RunStatus::Completed => 0,
    }
}

/// Serializes a value as one JSON line on stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let payload = serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("failed to serialize output: {err}")))?;
    write_stdout_line(&payload)
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Prints a clap outcome and maps it to an exit code.
///
/// `--help` is a success; every other parse failure is a usage failure.
fn report_parse_error(err: &clap::Error) -> ExitCode {
    let _ = err.print();
    ExitCode::from(parse_error_exit_code(err.kind()))
}

/// Exit code for a clap error kind.
const fn parse_error_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => EXIT_CONFIG,
    }
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::from(EXIT_CONFIG)
}
