//! Logging configuration and initialization for Stowbox.
//!
//! What the crate emits:
//!
//! - `info`: one summary per request (node deletion, account purge, expiry
//!   sweep) with counts, bytes and number of orphans.
//! - `warn`: every entry added to a deletion's error log, i.e. skipped
//!   children, failed listings, refused locators and failed removals.
//!   Critical entries go out at `error` instead.
//! - `error` on [`ORPHAN_TARGET`]: one record per object whose metadata is
//!   gone but which is still in the blob store. Fields are `owner`, `item`,
//!   `bucket`, `key`, `timestamp` and `reason`. A cleanup job can replay
//!   these.
//! - `error` on [`QUOTA_DRIFT_TARGET`]: one record per quota counter that
//!   could not be written. Fields are `owner`, `previous_used`, `delta`,
//!   `attempted_new_used`, `timestamp` and `reason`.
//! - `debug`: quota updates, stored objects, and rows or objects that were
//!   already gone when a deletion reached them.
//!
//! The two operator targets stay enabled at `error` whatever `RUST_LOG`
//! says about the rest of the crate.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::Result;

/// Log target for orphaned blob records.
pub const ORPHAN_TARGET: &str = "stowbox::orphan";

/// Log target for quota drift records.
pub const QUOTA_DRIFT_TARGET: &str = "stowbox::quota_drift";

/// Targets that must not be silenced by `RUST_LOG`.
const OPERATOR_TARGETS: [&str; 2] = [ORPHAN_TARGET, QUOTA_DRIFT_TARGET];

/// Parse log level string to tracing Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter at `level`, with the operator targets pinned at `error`.
fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for target in OPERATOR_TARGETS {
        if let Ok(directive) = format!("{target}=error").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the logging system with the given configuration.
///
/// Everything goes to stdout and to `config.file`, whose directory is
/// created if needed. The file is truncated on start, so orphan and drift
/// records should be shipped elsewhere before a restart.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(parse_level(&config.level));

    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let log_file = Arc::new(File::create(&config.file)?);

    // stdout and the log file
    let writer = std::io::stdout.and(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(filter)
        .init();

    Ok(())
}

/// Initialize console-only logging (for development/testing).
pub fn init_console_only(level: &str) {
    let filter = build_filter(parse_level(level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(true),
        )
        .with(filter)
        .init();
}
