//! Durable record snapshot (`.harvester/state/records.json`).
//!
//! The document holds every known record plus a bounded history of per-cycle
//! diff summaries. It is replaced as a whole through the atomic writer and only
//! after a successful scrape and reconcile.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::reconcile::{DiffSummary, Reconciled, Snapshot};
use crate::io::atomic::write_json_atomic;

/// One entry of `run_history`, appended per committed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub timestamp: DateTime<Utc>,
    /// Items in the raw batch, before in-batch dedup.
    pub scraped_count: usize,
    #[serde(flatten)]
    pub summary: DiffSummary,
}

/// On-disk layout of the record snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotDocument {
    pub last_updated: Option<DateTime<Utc>>,
    pub total_active: usize,
    pub records: Snapshot,
    pub run_history: Vec<RunHistoryEntry>,
}

/// Owns the record snapshot file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    history_limit: usize,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            path: path.into(),
            history_limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot document. A missing file is an empty store.
    ///
    /// Unlike the checkpoint, a corrupt snapshot is an error: replacing it with
    /// an empty one would silently drop every record's history.
    pub fn load(&self) -> Result<SnapshotDocument> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no record snapshot yet");
            return Ok(SnapshotDocument::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read record snapshot {}", self.path.display()))?;
        let document: SnapshotDocument = serde_json::from_str(&contents)
            .with_context(|| format!("parse record snapshot {}", self.path.display()))?;
        debug!(
            records = document.records.len(),
            total_active = document.total_active,
            "record snapshot loaded"
        );
        Ok(document)
    }

    /// Persist `reconciled` on top of `previous`, appending a history entry.
    pub fn commit(
        &self,
        previous: SnapshotDocument,
        reconciled: Reconciled,
        scraped_count: usize,
        now: DateTime<Utc>,
    ) -> Result<SnapshotDocument> {
        let mut run_history = previous.run_history;
        run_history.push(RunHistoryEntry {
            timestamp: now,
            scraped_count,
            summary: reconciled.summary,
        });
        if run_history.len() > self.history_limit {
            let excess = run_history.len() - self.history_limit;
            run_history.drain(..excess);
        }

        let document = SnapshotDocument {
            last_updated: Some(now),
            total_active: reconciled.summary.total_active,
            records: reconciled.snapshot,
            run_history,
        };
        write_json_atomic(&self.path, &document)?;
        info!(
            added = reconciled.summary.added,
            modified = reconciled.summary.modified,
            removed = reconciled.summary.removed,
            unchanged = reconciled.summary.unchanged,
            total_active = reconciled.summary.total_active,
            "record snapshot committed"
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::core::identity::{DEFAULT_IDENTITY_FIELDS, RawItem};
    use crate::core::reconcile::reconcile;

    fn fields() -> Vec<String> {
        DEFAULT_IDENTITY_FIELDS
            .iter()
            .map(|field| field.to_string())
            .collect()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn batch(titles: &[&str]) -> Vec<RawItem> {
        titles
            .iter()
            .map(|title| match json!({"title": title, "company": "Acme"}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn missing_snapshot_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path().join("records.json"), 10);
        assert_eq!(store.load().expect("load"), SnapshotDocument::default());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("records.json");
        fs::write(&path, "{\"records\": [").expect("write");

        let err = RecordStore::new(&path, 10).load().unwrap_err();
        assert!(err.to_string().contains("parse record snapshot"));
    }

    #[test]
    fn commit_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path().join("state/records.json"), 10);
        let previous = store.load().expect("load");
        let reconciled = reconcile(&previous.records, &batch(&["a", "b"]), &fields(), at(0));

        let committed = store
            .commit(previous, reconciled, 2, at(0))
            .expect("commit");
        let loaded = store.load().expect("reload");

        assert_eq!(loaded, committed);
        assert_eq!(loaded.total_active, 2);
        assert_eq!(loaded.last_updated, Some(at(0)));
        assert_eq!(loaded.run_history.len(), 1);
        assert_eq!(loaded.run_history[0].summary.added, 2);
        assert_eq!(loaded.run_history[0].scraped_count, 2);
    }

    #[test]
    fn history_is_bounded_to_most_recent_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path().join("records.json"), 3);

        for i in 0..5 {
            let previous = store.load().expect("load");
            let reconciled = reconcile(&previous.records, &batch(&["a"]), &fields(), at(i));
            store.commit(previous, reconciled, 1, at(i)).expect("commit");
        }

        let loaded = store.load().expect("load");
        let stamps: Vec<_> = loaded
            .run_history
            .iter()
            .map(|entry| entry.timestamp)
            .collect();
        assert_eq!(stamps, vec![at(2), at(3), at(4)]);
    }

    #[test]
    fn history_entry_flattens_summary_fields() {
        let entry = RunHistoryEntry {
            timestamp: at(0),
            scraped_count: 3,
            summary: DiffSummary {
                added: 1,
                modified: 0,
                removed: 0,
                unchanged: 2,
                total_active: 3,
            },
        };
        let value = serde_json::to_value(&entry).expect("json");
        assert_eq!(value["added"], 1);
        assert_eq!(value["unchanged"], 2);
        assert_eq!(value["scraped_count"], 3);
    }
}
