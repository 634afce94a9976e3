//! Durable storage for the controller checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::checkpoint::{Checkpoint, advance};
use crate::core::types::CycleOutcome;
use crate::io::atomic::write_json_atomic;

/// Owns `.harvester/state/checkpoint.json`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, falling back to the first-run default.
    ///
    /// A missing file is a normal first run. An unreadable or unparsable file
    /// is logged as a warning and also yields the default; it is never fatal.
    pub fn load(&self) -> Checkpoint {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint yet, first run");
            return Checkpoint::default();
        }
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "checkpoint unreadable, treating as first run");
                return Checkpoint::default();
            }
        };
        match serde_json::from_str::<Checkpoint>(&contents) {
            Ok(checkpoint) => {
                debug!(
                    status = %checkpoint.status,
                    consecutive_failures = checkpoint.consecutive_failures,
                    "checkpoint loaded"
                );
                checkpoint
            }
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "checkpoint corrupt, treating as first run");
                Checkpoint::default()
            }
        }
    }

    /// Commit the checkpoint that follows a cycle with `outcome`.
    ///
    /// The durable value is re-read immediately before the transition so that
    /// fields owned by earlier cycles are carried forward from what is actually
    /// on disk. `previous` is the value the caller loaded at cycle start; a
    /// mismatch is only logged since the durable value is authoritative.
    pub fn save(
        &self,
        previous: &Checkpoint,
        outcome: &CycleOutcome,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        let current = self.load();
        if &current != previous {
            debug!("durable checkpoint changed since cycle start, using durable value");
        }
        let next = advance(&current, outcome, now);
        write_json_atomic(&self.path, &next)?;
        debug!(
            status = %next.status,
            consecutive_failures = next.consecutive_failures,
            "checkpoint saved"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::core::types::{CheckpointStatus, StorageResult};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn outcome(storage: StorageResult, error: Option<&str>) -> CycleOutcome {
        CycleOutcome {
            attempts: 1,
            storage,
            duration: Duration::from_secs(2),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn missing_file_loads_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("checkpoint.json"));
        assert_eq!(store.load(), Checkpoint::default());
    }

    #[test]
    fn corrupt_file_loads_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.json");
        fs::write(&path, "{\"status\": \"production_re").expect("write");

        let store = CheckpointStore::new(&path);
        assert_eq!(store.load(), Checkpoint::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("state/checkpoint.json"));

        let saved = store
            .save(
                &Checkpoint::default(),
                &outcome(StorageResult::Stored, None),
                at(0),
            )
            .expect("save");

        assert_eq!(saved.status, CheckpointStatus::ProductionReady);
        assert_eq!(store.load(), saved);
    }

    /// `save` must build on the durable value, not the caller's stale copy.
    #[test]
    fn save_reads_durable_value_before_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(temp.path().join("checkpoint.json"));
        let stale = store.load();

        store
            .save(&stale, &outcome(StorageResult::Stored, None), at(0))
            .expect("first save");
        store
            .save(
                &stale,
                &outcome(StorageResult::NoData, Some("timed out")),
                at(10),
            )
            .expect("second save");
        let last = store
            .save(
                &stale,
                &outcome(StorageResult::NoData, Some("timed out")),
                at(20),
            )
            .expect("third save");

        assert_eq!(last.consecutive_failures, 2);
        assert_eq!(last.last_completed_session, Some(at(0)));
    }

    /// A crash mid-save leaves only a stray temp file; load still sees the prior value.
    #[test]
    fn interrupted_save_never_exposes_partial_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.json");
        let store = CheckpointStore::new(&path);
        let committed = store
            .save(
                &Checkpoint::default(),
                &outcome(StorageResult::Stored, None),
                at(0),
            )
            .expect("save");

        let full = serde_json::to_string_pretty(&advance(
            &committed,
            &outcome(StorageResult::NoData, Some("boom")),
            at(5),
        ))
        .expect("serialize");
        for cut in [0, 1, full.len() / 2, full.len() - 1] {
            let stray = temp.path().join(format!(".checkpoint.json.tmp-1-{cut}"));
            fs::write(&stray, &full.as_bytes()[..cut]).expect("write stray");
            assert_eq!(store.load(), committed, "cut at {cut}");
        }
    }
}
