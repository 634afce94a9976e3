//! Canonical locations under `.harvester/` for a deployment root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// All canonical paths within `.harvester/` for a deployment root.
#[derive(Debug, Clone)]
pub struct HarvestPaths {
    pub root: PathBuf,
    pub harvester_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub records_path: PathBuf,
    pub sessions_dir: PathBuf,
    pub summary_path: PathBuf,
    pub logs_dir: PathBuf,
    pub system_log_path: PathBuf,
    pub agent_logs_dir: PathBuf,
    pub work_dir: PathBuf,
    pub batch_path: PathBuf,
}

impl HarvestPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let harvester_dir = root.join(".harvester");
        let state_dir = harvester_dir.join("state");
        let logs_dir = harvester_dir.join("logs");
        let work_dir = harvester_dir.join("work");
        Self {
            root: root.clone(),
            harvester_dir: harvester_dir.clone(),
            config_path: harvester_dir.join("config.toml"),
            state_dir: state_dir.clone(),
            checkpoint_path: state_dir.join("checkpoint.json"),
            records_path: state_dir.join("records.json"),
            sessions_dir: harvester_dir.join("sessions"),
            summary_path: harvester_dir.join("summaries").join("system_summary.md"),
            logs_dir: logs_dir.clone(),
            system_log_path: logs_dir.join("system.log"),
            agent_logs_dir: logs_dir.join("agent"),
            work_dir: work_dir.clone(),
            batch_path: work_dir.join("batch.json"),
        }
    }

    /// Diagnostic log for one agent attempt.
    pub fn agent_log_path(&self, attempt: u32) -> PathBuf {
        self.agent_logs_dir.join(format!("attempt-{attempt}.log"))
    }

    /// Resolve a path from the config relative to the deployment root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// `session_<YYYYMMDDTHHMMSSZ>.md`, with `_<n>` appended for collisions.
pub fn session_file_name(started_at: DateTime<Utc>, suffix: Option<u32>) -> String {
    let stamp = started_at.format("%Y%m%dT%H%M%SZ");
    match suffix {
        Some(n) => format!("session_{stamp}_{n}.md"),
        None => format!("session_{stamp}.md"),
    }
}
