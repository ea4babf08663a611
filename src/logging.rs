// src/logging.rs

//! Logging setup.
//!
//! Everything goes to STDERR; STDOUT is reserved for the dry-run
//! deployment listing. The active filter is resolved in this order:
//!
//! 1. `--log-level` CLI flag
//! 2. `HOTSYNC_LOG` environment variable, which accepts full `tracing`
//!    directives (e.g. `info,hotsync::watch=trace`)
//! 3. `info`

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var("HOTSYNC_LOG").ok();
    fmt()
        .with_env_filter(resolve_filter(cli_level, env.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    match (cli_level, env) {
        (Some(level), _) => EnvFilter::new(directive_for(level)),
        (None, Some(directives)) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new("info"),
    }
}

fn directive_for(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
