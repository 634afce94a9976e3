//! Dedup and change detection between the stored snapshot and a scraped batch.
//!
//! [`reconcile`] is pure: it depends only on its inputs and the supplied clock
//! reading. Persisting the result is a separate step in `io::record_store`, so a
//! crash between the two leaves the durable snapshot unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::identity::{RawItem, identity_of};
use crate::core::types::RecordStatus;

/// A single distinct posting tracked across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identity: String,
    /// Item payload exactly as scraped in the cycle that last saw it.
    pub content: RawItem,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: RecordStatus,
}

impl Record {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Every known record keyed by identity. Ordered so serialized output is stable.
pub type Snapshot = BTreeMap<String, Record>;

/// Counts produced by one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Active records in the resulting snapshot.
    pub total_active: usize,
}

impl DiffSummary {
    /// True when the batch changed nothing relative to the previous snapshot.
    pub fn is_stable(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.removed == 0
    }
}

/// New snapshot plus the diff that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub snapshot: Snapshot,
    pub summary: DiffSummary,
}

/// Reconcile `batch` against `previous`.
///
/// Items sharing an identity inside one batch collapse before diffing; the
/// later occurrence wins. Records already marked removed that stay absent are
/// carried over without being counted again. A removed record that reappears
/// is reactivated (keeping `first_seen`) and counts as added.
pub fn reconcile(
    previous: &Snapshot,
    batch: &[RawItem],
    identity_fields: &[String],
    now: DateTime<Utc>,
) -> Reconciled {
    let mut latest: BTreeMap<String, &RawItem> = BTreeMap::new();
    for item in batch {
        latest.insert(identity_of(item, identity_fields), item);
    }

    let mut summary = DiffSummary::default();
    let mut snapshot = Snapshot::new();

    for (identity, content) in &latest {
        let record = match previous.get(identity) {
            None => {
                summary.added += 1;
                Record {
                    identity: identity.clone(),
                    content: (*content).clone(),
                    first_seen: now,
                    last_seen: now,
                    status: RecordStatus::Active,
                }
            }
            Some(prior) => {
                if !prior.is_active() {
                    summary.added += 1;
                } else if prior.content == **content {
                    summary.unchanged += 1;
                } else {
                    summary.modified += 1;
                }
                Record {
                    identity: identity.clone(),
                    content: (*content).clone(),
                    first_seen: prior.first_seen,
                    last_seen: now,
                    status: RecordStatus::Active,
                }
            }
        };
        snapshot.insert(identity.clone(), record);
    }

    for (identity, prior) in previous {
        if latest.contains_key(identity) {
            continue;
        }
        let mut record = prior.clone();
        if record.is_active() {
            summary.removed += 1;
            record.status = RecordStatus::Removed;
        }
        snapshot.insert(identity.clone(), record);
    }

    summary.total_active = snapshot.values().filter(|record| record.is_active()).count();
    Reconciled { snapshot, summary }
}
