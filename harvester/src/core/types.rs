//! Shared deterministic types for harvester core logic.
//!
//! These types define stable contracts between the controller, the checkpoint
//! store, and the record store. They carry no I/O and serialize to the exact
//! strings that appear in the durable JSON documents and session records.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health of the deployment as recorded in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// No cycle has completed yet, or the checkpoint could not be read.
    #[default]
    Unknown,
    /// The most recent cycle scraped and stored successfully.
    ProductionReady,
    /// The most recent cycle failed; the next scheduled cycle is the retry.
    ErrorRecovery,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::Unknown => "unknown",
            CheckpointStatus::ProductionReady => "production_ready",
            CheckpointStatus::ErrorRecovery => "error_recovery",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the scraped batch in the storing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageResult {
    /// The reconciled snapshot was durably committed.
    Stored,
    /// Storage was not attempted because the agent produced no batch.
    NoData,
    /// Loading, reconciling, or committing the snapshot failed.
    StorageError,
}

impl StorageResult {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageResult::Stored => "stored",
            StorageResult::NoData => "no_data",
            StorageResult::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for StorageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    /// Absent from the most recent batch. Kept so history stays queryable.
    Removed,
}

/// Phases of a single controller cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    LoadingCheckpoint,
    ExecutingAgent,
    StoringResults,
    UpdatingCheckpoint,
    WritingSessionLog,
    Done,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::LoadingCheckpoint => "loading_checkpoint",
            CyclePhase::ExecutingAgent => "executing_agent",
            CyclePhase::StoringResults => "storing_results",
            CyclePhase::UpdatingCheckpoint => "updating_checkpoint",
            CyclePhase::WritingSessionLog => "writing_session_log",
            CyclePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of one cycle as seen by the checkpoint transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// Agent attempts made (1-indexed count, 0 only if the agent never ran).
    pub attempts: u32,
    pub storage: StorageResult,
    /// Wall-clock time of the whole cycle.
    pub duration: Duration,
    /// Last agent failure or storage failure, if any.
    pub error: Option<String>,
}

impl CycleOutcome {
    /// A cycle succeeds only when a batch was scraped and durably stored.
    pub fn is_success(&self) -> bool {
        self.storage == StorageResult::Stored && self.error.is_none()
    }
}
