//! System summary document (`.harvester/summaries/system_summary.md`).
//!
//! Rewritten after every cycle from the checkpoint and record snapshot so a
//! human can see deployment health at a glance. Like session records it is
//! never read back by the controller.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::checkpoint::Checkpoint;
use crate::core::types::CheckpointStatus;
use crate::io::atomic::write_atomic;
use crate::io::record_store::SnapshotDocument;

const SUMMARY_TEMPLATE: &str = include_str!("../templates/summary.md");
/// Most recent runs listed in the summary table.
const RECENT_RUNS: usize = 10;

/// Render the summary from the latest durable state.
pub fn render_summary(
    checkpoint: &Checkpoint,
    records: &SnapshotDocument,
    now: DateTime<Utc>,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)?;

    let skip = records.run_history.len().saturating_sub(RECENT_RUNS);
    let history: Vec<_> = records.run_history.iter().skip(skip).rev().collect();
    let rendered = env.get_template("summary")?.render(context! {
        updated_at => now.to_rfc3339_opts(SecondsFormat::Secs, true),
        status => checkpoint.status.as_str(),
        operational => checkpoint.system_operational,
        last_completed => checkpoint
            .last_completed_session
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        consecutive_failures => checkpoint.consecutive_failures,
        next_session => &checkpoint.next_session,
        last_error => &checkpoint.last_error,
        total_active => records.total_active,
        total_known => records.records.len(),
        history => &history,
        recovery => recovery_note(checkpoint),
    })?;
    Ok(rendered)
}

/// Render and atomically replace the summary file.
pub fn write_summary(
    path: &Path,
    checkpoint: &Checkpoint,
    records: &SnapshotDocument,
    now: DateTime<Utc>,
) -> Result<()> {
    let rendered = render_summary(checkpoint, records, now)?;
    write_atomic(path, rendered.as_bytes())?;
    debug!(path = %path.display(), "system summary written");
    Ok(())
}

fn recovery_note(checkpoint: &Checkpoint) -> String {
    match checkpoint.status {
        CheckpointStatus::ProductionReady => {
            "No action needed. The next scheduled cycle scrapes and reconciles again.".to_string()
        }
        CheckpointStatus::ErrorRecovery => format!(
            "The last {} cycle(s) failed. The next scheduled cycle retries automatically; \
             inspect the latest session record and `logs/agent/` if failures persist.",
            checkpoint.consecutive_failures
        ),
        CheckpointStatus::Unknown => {
            "No cycle has completed yet. Run `harvester run` or wait for the scheduler.".to_string()
        }
    }
}
