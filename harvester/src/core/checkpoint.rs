//! Checkpoint value and its per-cycle transition.
//!
//! The transition is a pure function of the current durable checkpoint, the
//! cycle outcome, and the clock reading. The store in `io::checkpoint_store`
//! is responsible for reading the durable value right before calling
//! [`advance`] and for committing the result atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{CheckpointStatus, CycleOutcome};

/// Hint written when no cycle has ever run.
pub const NEXT_SESSION_SETUP: &str = "setup_environment";
/// Hint written after a successful cycle.
pub const NEXT_SESSION_SCRAPE: &str = "scrape_and_store";
/// Hint written after a failed cycle.
pub const NEXT_SESSION_RETRY: &str = "retry_scrape";

/// Durable controller state (`.harvester/state/checkpoint.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub status: CheckpointStatus,
    /// Free-form hint for the next cycle's intended action.
    pub next_session: String,
    pub last_updated: Option<DateTime<Utc>>,
    /// Timestamp of the most recent successful cycle. Untouched by failures.
    pub last_completed_session: Option<DateTime<Utc>>,
    pub system_operational: bool,
    pub last_run_duration_s: f64,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            status: CheckpointStatus::Unknown,
            next_session: NEXT_SESSION_SETUP.to_string(),
            last_updated: None,
            last_completed_session: None,
            system_operational: false,
            last_run_duration_s: 0.0,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

impl Checkpoint {
    /// True when a previous cycle left the system healthy.
    pub fn is_production_ready(&self) -> bool {
        self.status == CheckpointStatus::ProductionReady
    }
}

/// Compute the checkpoint that follows `current` after a cycle ended with `outcome`.
///
/// Success resets `consecutive_failures` to 0 and stamps `last_completed_session`;
/// failure increments the counter by one and carries `last_completed_session` forward.
pub fn advance(current: &Checkpoint, outcome: &CycleOutcome, now: DateTime<Utc>) -> Checkpoint {
    let duration_s = outcome.duration.as_secs_f64();
    if outcome.is_success() {
        Checkpoint {
            status: CheckpointStatus::ProductionReady,
            next_session: NEXT_SESSION_SCRAPE.to_string(),
            last_updated: Some(now),
            last_completed_session: Some(now),
            system_operational: true,
            last_run_duration_s: duration_s,
            last_error: None,
            consecutive_failures: 0,
        }
    } else {
        let error = outcome
            .error
            .clone()
            .unwrap_or_else(|| format!("cycle ended with storage result {}", outcome.storage));
        Checkpoint {
            status: CheckpointStatus::ErrorRecovery,
            next_session: NEXT_SESSION_RETRY.to_string(),
            last_updated: Some(now),
            last_completed_session: current.last_completed_session,
            system_operational: false,
            last_run_duration_s: duration_s,
            last_error: Some(error),
            consecutive_failures: current.consecutive_failures.saturating_add(1),
        }
    }
}
