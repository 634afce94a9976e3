//! Tracing setup for the controller binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operational diagnostics filtered by `RUST_LOG`,
//!   written to stderr and, for `harvester run`, appended to
//!   `.harvester/logs/system.log`.
//!
//! - **Session records (`io/session_log`)**: one Markdown file per cycle under
//!   `.harvester/sessions/`. Always written, unaffected by `RUST_LOG`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` if unset. stderr gets the compact
/// format. When `log_file` is given, the same events are appended to it
/// without ANSI colors.
///
/// # Example
/// ```bash
/// RUST_LOG=harvester=debug harvester run
/// ```
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")
}
