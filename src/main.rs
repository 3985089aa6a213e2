//! sockcache: bound-socket cache for a privileged boss process
//!
//! This is the main entry point for the sockcache binary. It handles CLI
//! argument parsing, configuration loading, and telemetry initialization, then
//! dispatches to the requested command.
//!
//! Developer logging goes to stderr through `tracing`. Audit events go to
//! syslog, or nowhere when `[audit] syslog = false` or syslog is unreachable.

use anyhow::{Context, Result};
use clap::Parser;
use sockcache::{cli::Cli, cli_handler, config::ConfigLoader, telemetry::AuditLogger};
use std::sync::Arc;
use tracing::{debug, warn};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    let audit = if config.audit.syslog_enabled() {
        match AuditLogger::new() {
            Ok(logger) => logger,
            Err(e) => {
                warn!("Audit logging disabled: {}", e);
                AuditLogger::new_null()
            }
        }
    } else {
        AuditLogger::new_null()
    };

    cli_handler::handle_command(&cli, config, Arc::new(audit))
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, or warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
