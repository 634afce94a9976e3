//! Cycle-level scenarios driven through `run_cycle` with scripted agents.
//!
//! Each test uses a fresh temporary deployment root and inspects the durable
//! artifacts (checkpoint, record snapshot, session records) the way an
//! operator would after the scheduler ran the controller.

use std::fs;

use harvester::core::identity::identity_of;
use harvester::core::reconcile::DiffSummary;
use harvester::core::types::{CheckpointStatus, RecordStatus, StorageResult};
use harvester::cycle::{CycleOptions, CycleReport, run_cycle};
use harvester::io::checkpoint_store::CheckpointStore;
use harvester::io::record_store::{RecordStore, SnapshotDocument};
use harvester::test_support::{
    RecordingSleeper, ScriptedAgent, TestRoot, posting, posting_with, postings,
};

fn cycle(root: &TestRoot, agent: &ScriptedAgent) -> CycleReport {
    run_cycle(
        &root.paths,
        &root.config(),
        agent,
        &mut RecordingSleeper::default(),
        CycleOptions::default(),
    )
    .expect("cycle")
}

fn snapshot(root: &TestRoot) -> SnapshotDocument {
    RecordStore::new(&root.paths.records_path, 100)
        .load()
        .expect("snapshot")
}

fn session_count(root: &TestRoot) -> usize {
    fs::read_dir(&root.paths.sessions_dir)
        .expect("sessions dir")
        .count()
}

/// First-ever run with no durable state: five new records, healthy checkpoint.
#[test]
fn first_run_stores_every_item_as_added() {
    let root = TestRoot::new().expect("root");

    let report = cycle(&root, &ScriptedAgent::succeeding(postings(5)));

    assert!(report.success());
    let checkpoint = CheckpointStore::new(&root.paths.checkpoint_path).load();
    assert_eq!(checkpoint.status, CheckpointStatus::ProductionReady);
    assert!(checkpoint.system_operational);
    assert_eq!(checkpoint.consecutive_failures, 0);
    assert!(checkpoint.last_completed_session.is_some());

    let document = snapshot(&root);
    assert_eq!(document.total_active, 5);
    assert_eq!(document.records.len(), 5);
    assert_eq!(
        report.diff,
        Some(DiffSummary {
            added: 5,
            modified: 0,
            removed: 0,
            unchanged: 0,
            total_active: 5,
        })
    );
    assert_eq!(document.run_history.len(), 1);
    assert_eq!(document.run_history[0].scraped_count, 5);
    assert_eq!(session_count(&root), 1);
}

/// X stays, Y disappears, Z is new.
#[test]
fn absent_records_are_marked_removed_and_kept() {
    let root = TestRoot::new().expect("root");
    let x = posting("Backend Engineer", "Acme", "Berlin", "x-1");
    let y = posting("Data Engineer", "Acme", "Remote", "y-1");
    let z = posting("SRE", "Globex", "Paris", "z-1");
    cycle(&root, &ScriptedAgent::succeeding(vec![x.clone(), y.clone()]));

    let report = cycle(&root, &ScriptedAgent::succeeding(vec![x.clone(), z.clone()]));

    let summary = report.diff.expect("diff");
    assert_eq!(
        (summary.added, summary.modified, summary.removed, summary.unchanged),
        (1, 0, 1, 1)
    );
    let fields = root.config().records.identity_fields;
    let document = snapshot(&root);
    assert_eq!(document.records.len(), 3);
    assert_eq!(document.total_active, 2);
    assert_eq!(
        document.records[&identity_of(&x, &fields)].status,
        RecordStatus::Active
    );
    assert_eq!(
        document.records[&identity_of(&z, &fields)].status,
        RecordStatus::Active
    );
    assert_eq!(
        document.records[&identity_of(&y, &fields)].status,
        RecordStatus::Removed
    );
}

/// Changing a non-identity field keeps the identity and counts as modified.
#[test]
fn content_change_is_modified_not_added() {
    let root = TestRoot::new().expect("root");
    let before = posting_with("SRE", "Globex", "Paris", "z-1", &[("salary", "60k")]);
    let after = posting_with("SRE", "Globex", "Paris", "z-1", &[("salary", "65k")]);
    let first = cycle(&root, &ScriptedAgent::succeeding(vec![before]));

    let report = cycle(&root, &ScriptedAgent::succeeding(vec![after.clone()]));

    let summary = report.diff.expect("diff");
    assert_eq!((summary.added, summary.modified), (0, 1));
    let fields = root.config().records.identity_fields;
    let record = &snapshot(&root).records[&identity_of(&after, &fields)];
    assert_eq!(record.content["salary"], "65k");
    assert!(record.first_seen <= first.checkpoint.last_updated.expect("stamped"));
}

/// Agent fails every attempt: failure recorded, snapshot untouched.
#[test]
fn exhausted_agent_leaves_snapshot_untouched() {
    let root = TestRoot::new().expect("root");
    cycle(&root, &ScriptedAgent::succeeding(postings(3)));
    let before = fs::read(&root.paths.records_path).expect("snapshot bytes");

    let mut sleeper = RecordingSleeper::default();
    let report = run_cycle(
        &root.paths,
        &root.config(),
        &ScriptedAgent::failing(3),
        &mut sleeper,
        CycleOptions::default(),
    )
    .expect("cycle");

    assert!(!report.success());
    assert_eq!(report.outcome.storage, StorageResult::NoData);
    assert_eq!(report.outcome.attempts, 3);
    let retry = root.config().retry;
    assert_eq!(
        sleeper.total(),
        retry.initial_delay() + (retry.initial_delay() * 2).min(retry.max_delay())
    );

    let checkpoint = CheckpointStore::new(&root.paths.checkpoint_path).load();
    assert_eq!(checkpoint.status, CheckpointStatus::ErrorRecovery);
    assert!(!checkpoint.system_operational);
    assert_eq!(checkpoint.consecutive_failures, 1);
    assert!(checkpoint.last_completed_session.is_some());
    assert!(
        checkpoint
            .last_error
            .as_deref()
            .is_some_and(|err| err.contains("scripted failure 3"))
    );
    assert_eq!(fs::read(&root.paths.records_path).expect("snapshot bytes"), before);

    let sessions: Vec<String> = fs::read_dir(&root.paths.sessions_dir)
        .expect("sessions")
        .map(|entry| fs::read_to_string(entry.expect("entry").path()).expect("read"))
        .collect();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().any(|body| body.contains("`no_data`")));
}

/// The failure counter always equals the trailing run of failed cycles.
#[test]
fn failure_counter_tracks_trailing_failures() {
    let root = TestRoot::new().expect("root");
    let plan = [true, false, false, true, false, false, false];
    let mut trailing = 0;

    for succeed in plan {
        let agent = if succeed {
            ScriptedAgent::succeeding(postings(1))
        } else {
            ScriptedAgent::failing(3)
        };
        let report = cycle(&root, &agent);
        trailing = if succeed { 0 } else { trailing + 1 };

        let checkpoint = CheckpointStore::new(&root.paths.checkpoint_path).load();
        assert_eq!(checkpoint.consecutive_failures, trailing);
        assert_eq!(report.checkpoint, checkpoint);
    }
    assert_eq!(session_count(&root), plan.len());
}

/// A corrupt checkpoint is treated as a first run instead of aborting.
#[test]
fn corrupt_checkpoint_falls_back_to_default() {
    let root = TestRoot::new().expect("root");
    cycle(&root, &ScriptedAgent::failing(3));
    fs::write(&root.paths.checkpoint_path, "{\"status\": ").expect("corrupt");

    let report = cycle(&root, &ScriptedAgent::succeeding(postings(1)));

    assert_eq!(report.attempted, "setup_environment");
    assert!(report.success());
    let checkpoint = CheckpointStore::new(&root.paths.checkpoint_path).load();
    assert_eq!(checkpoint.status, CheckpointStatus::ProductionReady);
}

/// Duplicate identities inside one batch collapse to a single record.
#[test]
fn duplicate_items_in_batch_yield_one_record() {
    let root = TestRoot::new().expect("root");
    let first = posting_with("SRE", "Globex", "Paris", "z-1", &[("salary", "60k")]);
    let second = posting_with("  sre ", "GLOBEX", "paris", "z-1", &[("salary", "70k")]);

    let report = cycle(&root, &ScriptedAgent::succeeding(vec![first, second.clone()]));

    assert_eq!(report.diff.map(|diff| diff.added), Some(1));
    let document = snapshot(&root);
    assert_eq!(document.records.len(), 1);
    let fields = root.config().records.identity_fields;
    assert_eq!(
        document.records[&identity_of(&second, &fields)].content["salary"],
        "70k"
    );
    assert_eq!(document.run_history[0].scraped_count, 2);
}

/// The system summary reflects the latest cycle.
#[test]
fn summary_is_rewritten_every_cycle() {
    let root = TestRoot::new().expect("root");
    cycle(&root, &ScriptedAgent::succeeding(postings(2)));
    cycle(&root, &ScriptedAgent::failing(3));

    let summary = fs::read_to_string(&root.paths.summary_path).expect("summary");
    assert!(summary.contains("`error_recovery`"));
    assert!(summary.contains("- Active records: 2"));
    assert!(summary.contains("- Consecutive failures: 1"));
}
