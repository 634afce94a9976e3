//! Per-cycle session records under `.harvester/sessions/`.
//!
//! Session records are an audit trail only: the controller writes exactly one
//! per cycle and never reads them back. Existing files are never overwritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::reconcile::DiffSummary;
use crate::core::types::{CheckpointStatus, StorageResult};
use crate::io::atomic::write_atomic;
use crate::io::paths::session_file_name;

const SESSION_TEMPLATE: &str = include_str!("../templates/session.md");
const MAX_NAME_COLLISIONS: u32 = 1000;

/// Everything a session record reports about one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub started_at: DateTime<Utc>,
    /// Action the cycle set out to perform (the checkpoint's `next_session` hint).
    pub attempted: String,
    pub success: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub storage: StorageResult,
    pub duration_s: f64,
    pub checkpoint_status: CheckpointStatus,
    pub consecutive_failures: u32,
    pub diff: Option<DiffSummary>,
    pub errors: Vec<String>,
    /// Free-form note for whoever reads the trail next.
    pub continuation: String,
}

/// Render `record` to Markdown.
pub fn render_session(record: &SessionRecord) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("session", SESSION_TEMPLATE)?;
    let rendered = env.get_template("session")?.render(context! {
        started_at => record.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        attempted => record.attempted.trim(),
        success => record.success,
        attempts => record.attempts,
        max_attempts => record.max_attempts,
        storage => record.storage.as_str(),
        duration_s => format!("{:.2}", record.duration_s),
        checkpoint_status => record.checkpoint_status.as_str(),
        consecutive_failures => record.consecutive_failures,
        diff => &record.diff,
        errors => &record.errors,
        continuation => record.continuation.trim(),
    })?;
    Ok(rendered)
}

/// Write a new session file into `sessions_dir` and return its path.
///
/// Named by the cycle start time; a second cycle in the same second gets a
/// `_<n>` suffix instead of replacing the first record.
pub fn write_session(sessions_dir: &Path, record: &SessionRecord) -> Result<PathBuf> {
    let rendered = render_session(record)?;
    let path = next_free_path(sessions_dir, record.started_at)?;
    write_atomic(&path, rendered.as_bytes())
        .with_context(|| format!("write session record {}", path.display()))?;
    debug!(path = %path.display(), "session record written");
    Ok(path)
}

fn next_free_path(sessions_dir: &Path, started_at: DateTime<Utc>) -> Result<PathBuf> {
    let first = sessions_dir.join(session_file_name(started_at, None));
    if !first.exists() {
        return Ok(first);
    }
    (1..=MAX_NAME_COLLISIONS)
        .map(|n| sessions_dir.join(session_file_name(started_at, Some(n))))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| anyhow!("too many session records for {started_at}"))
}
