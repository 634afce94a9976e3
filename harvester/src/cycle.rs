//! Orchestration for a single `harvester run` cycle.
//!
//! A cycle loads the checkpoint, drives the agent through the retry executor,
//! reconciles and stores the batch, advances the checkpoint, and writes a
//! session record. Only environment problems detected before the cycle starts
//! are returned as errors; everything after that is folded into the
//! [`CycleReport`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::core::backoff::worst_case_sleep;
use crate::core::checkpoint::{Checkpoint, advance};
use crate::core::identity::RawItem;
use crate::core::reconcile::{DiffSummary, reconcile};
use crate::core::types::{CycleOutcome, CyclePhase, StorageResult};
use crate::io::agent::{Agent, AgentRequest, invoke_and_load};
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::config::HarvesterConfig;
use crate::io::paths::HarvestPaths;
use crate::io::record_store::{RecordStore, SnapshotDocument};
use crate::io::retry::{RetryPolicy, Sleeper, run_with_retry};
use crate::io::session_log::{SessionRecord, write_session};
use crate::io::summary::write_summary;

/// Marker attached to errors that stop a cycle before it starts.
///
/// Nothing durable is touched when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentError;

impl fmt::Display for EnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("environment check failed")
    }
}

/// True when `err` was raised by the pre-cycle environment checks.
pub fn is_environment_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EnvironmentError>().is_some()
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Run even when the checkpoint reports a healthy system.
    pub force: bool,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// `next_session` hint the cycle started from.
    pub attempted: String,
    pub outcome: CycleOutcome,
    /// Checkpoint after the transition. Only durable when `checkpoint_saved`.
    pub checkpoint: Checkpoint,
    pub checkpoint_saved: bool,
    /// Present when the batch was stored.
    pub diff: Option<DiffSummary>,
    pub session_path: Option<PathBuf>,
    /// Phases entered, in order.
    pub phases: Vec<CyclePhase>,
    /// Agent, storage and bookkeeping failures, in the order they happened.
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Run one complete cycle rooted at `paths`.
///
/// Returns `Err` only for [`EnvironmentError`]s found before any durable
/// state is read. Agent, storage, checkpoint and session failures are logged
/// and reported through the returned [`CycleReport`].
#[instrument(skip_all, fields(root = %paths.root.display(), force = options.force))]
pub fn run_cycle<A, S>(
    paths: &HarvestPaths,
    cfg: &HarvesterConfig,
    agent: &A,
    sleeper: &mut S,
    options: CycleOptions,
) -> Result<CycleReport>
where
    A: Agent + ?Sized,
    S: Sleeper + ?Sized,
{
    let started_at = Utc::now();
    let start = Instant::now();

    cfg.validate().context(EnvironmentError)?;
    agent.preflight().context(EnvironmentError)?;
    ensure_layout(paths).context(EnvironmentError)?;

    let mut phases = Vec::new();
    let mut errors = Vec::new();

    enter(&mut phases, CyclePhase::LoadingCheckpoint);
    let checkpoints = CheckpointStore::new(&paths.checkpoint_path);
    let previous = checkpoints.load();
    if previous.is_production_ready() && !options.force {
        info!(
            last_completed = ?previous.last_completed_session,
            "system already production ready; running the scheduled cycle anyway"
        );
    }
    let attempted = previous.next_session.clone();

    enter(&mut phases, CyclePhase::ExecutingAgent);
    let policy = RetryPolicy::from(&cfg.retry);
    debug!(
        max_attempts = policy.max_attempts,
        worst_case_sleep_secs =
            worst_case_sleep(policy.max_attempts, policy.initial_delay, policy.max_delay).as_secs(),
        "retry budget"
    );
    let agent_config = paths.resolve(&cfg.agent.config_path);
    let retry = run_with_retry(&policy, sleeper, |attempt| {
        invoke_and_load(
            agent,
            &AgentRequest {
                attempt: attempt.number,
                workdir: paths.root.clone(),
                config_path: agent_config.clone(),
                output_path: paths.batch_path.clone(),
                log_path: paths.agent_log_path(attempt.number),
                timeout: attempt.timeout,
            },
        )
    });

    let records = RecordStore::new(&paths.records_path, cfg.records.history_limit);
    let mut stored_document = None;
    let (storage, diff) = match retry.result {
        Ok(batch) => {
            enter(&mut phases, CyclePhase::StoringResults);
            match store_batch(&records, &batch, &cfg.records.identity_fields, Utc::now()) {
                Ok(document) => {
                    let diff = document.run_history.last().map(|entry| entry.summary);
                    stored_document = Some(document);
                    (StorageResult::Stored, diff)
                }
                Err(err) => {
                    error!(err = %format!("{err:#}"), "storing batch failed");
                    errors.push(format!("storage failed: {err:#}"));
                    (StorageResult::StorageError, None)
                }
            }
        }
        Err(err) => {
            warn!(attempts = retry.attempts, "agent attempts exhausted");
            errors.push(format!(
                "agent failed after {} attempt(s): {err:#}",
                retry.attempts
            ));
            (StorageResult::NoData, None)
        }
    };

    let outcome = CycleOutcome {
        attempts: retry.attempts,
        storage,
        duration: start.elapsed(),
        error: errors.first().cloned(),
    };

    enter(&mut phases, CyclePhase::UpdatingCheckpoint);
    let now = Utc::now();
    let (checkpoint, checkpoint_saved) = match checkpoints.save(&previous, &outcome, now) {
        Ok(saved) => (saved, true),
        Err(err) => {
            error!(err = %format!("{err:#}"), "saving checkpoint failed");
            errors.push(format!("checkpoint save failed: {err:#}"));
            (advance(&previous, &outcome, now), false)
        }
    };

    enter(&mut phases, CyclePhase::WritingSessionLog);
    let session = SessionRecord {
        started_at,
        attempted: attempted.clone(),
        success: outcome.is_success(),
        attempts: outcome.attempts,
        max_attempts: policy.max_attempts,
        storage,
        duration_s: outcome.duration.as_secs_f64(),
        checkpoint_status: checkpoint.status,
        consecutive_failures: checkpoint.consecutive_failures,
        diff,
        errors: errors.clone(),
        continuation: continuation_note(&checkpoint),
    };
    let session_path = match write_session(&paths.sessions_dir, &session) {
        Ok(path) => Some(path),
        Err(err) => {
            error!(err = %format!("{err:#}"), "writing session record failed");
            errors.push(format!("session record failed: {err:#}"));
            None
        }
    };

    refresh_summary(paths, &records, stored_document, &checkpoint);

    enter(&mut phases, CyclePhase::Done);
    info!(
        success = outcome.is_success(),
        attempts = outcome.attempts,
        storage = %outcome.storage,
        duration_s = outcome.duration.as_secs_f64(),
        consecutive_failures = checkpoint.consecutive_failures,
        "cycle finished"
    );

    Ok(CycleReport {
        started_at,
        attempted,
        outcome,
        checkpoint,
        checkpoint_saved,
        diff,
        session_path,
        phases,
        errors,
    })
}

fn enter(phases: &mut Vec<CyclePhase>, phase: CyclePhase) {
    debug!(%phase, "entering phase");
    phases.push(phase);
}

/// Create the directories the cycle writes into.
pub fn ensure_layout(paths: &HarvestPaths) -> Result<()> {
    for dir in [
        &paths.state_dir,
        &paths.sessions_dir,
        &paths.agent_logs_dir,
        &paths.work_dir,
    ] {
        create_dir(dir)?;
    }
    if let Some(parent) = paths.summary_path.parent() {
        create_dir(parent)?;
    }
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}

/// Reconcile `batch` against the durable snapshot and commit the result.
fn store_batch(
    records: &RecordStore,
    batch: &[RawItem],
    identity_fields: &[String],
    now: DateTime<Utc>,
) -> Result<SnapshotDocument> {
    let previous = records.load()?;
    let reconciled = reconcile(&previous.records, batch, identity_fields, now);
    records.commit(previous, reconciled, batch.len(), now)
}

fn refresh_summary(
    paths: &HarvestPaths,
    records: &RecordStore,
    stored: Option<SnapshotDocument>,
    checkpoint: &Checkpoint,
) {
    let document = match stored {
        Some(document) => document,
        None => match records.load() {
            Ok(document) => document,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "record snapshot unreadable, summary lists no records");
                SnapshotDocument::default()
            }
        },
    };
    if let Err(err) = write_summary(&paths.summary_path, checkpoint, &document, Utc::now()) {
        warn!(err = %format!("{err:#}"), "writing system summary failed");
    }
}

fn continuation_note(checkpoint: &Checkpoint) -> String {
    if checkpoint.is_production_ready() {
        "System healthy. The next scheduled cycle scrapes and reconciles again.".to_string()
    } else {
        format!(
            "Cycle failed ({} in a row). The next scheduled cycle retries; \
             agent output for each attempt is under logs/agent/.",
            checkpoint.consecutive_failures
        )
    }
}
