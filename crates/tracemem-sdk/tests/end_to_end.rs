use std::fs::OpenOptions;
use std::io::Write as _;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use tracemem_sdk::{
    ConsolidationState, CoreError, MessageKind, Outcome, SessionId, SessionStatus, SweepOutcome,
    TraceMemory, TraceMemoryConfig,
};

fn quick_config() -> TraceMemoryConfig {
    let mut config = TraceMemoryConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

fn agents() -> Vec<String> {
    vec!["A".into(), "B".into()]
}

#[test]
fn test_handoff_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let session = memory.open_session("proj", "handoff", &agents()).unwrap();
    let id = session.id().clone();

    let s1 = memory
        .record(&id, "A", "B", MessageKind::Request, json!({"ask": "plan"}), "", 1)
        .unwrap();
    let s2 = memory
        .record(&id, "B", "A", MessageKind::Response, json!({"plan": []}), "", 1)
        .unwrap();
    assert_eq!((s1, s2), (1, 2));

    let outcome = memory.close(&id).unwrap();
    assert_eq!(outcome.handle.status(), SessionStatus::Closed);
    let result = outcome.consolidation.unwrap();
    assert_eq!(result.patterns.len(), 1);
    assert_eq!(result.patterns[0].participants, vec!["A", "B"]);
    assert_eq!(result.patterns[0].outcome, Outcome::SuccessfulHandoff);
    assert_eq!(result.patterns[0].mean_step_distance, Some(0.0));

    let entries = memory.patterns(Some(("A", "B"))).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].count, 1);
    assert_eq!(entries[0].last_updated_session, id);
}

#[test]
fn test_error_scenario_reports_gap() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
    memory
        .record(&id, "A", "B", MessageKind::Request, json!(null), "", 1)
        .unwrap();
    memory
        .record(&id, "B", "A", MessageKind::Error, json!({"err": "timeout"}), "", 2)
        .unwrap();

    let result = memory.close(&id).unwrap().consolidation.unwrap();
    assert!(matches!(
        result.patterns[0].outcome,
        Outcome::Unresolved | Outcome::Bottleneck
    ));
    assert_eq!(result.knowledge_gaps.len(), 1);
}

#[test]
fn test_empty_session_closes_with_empty_result() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &[]).unwrap().session.id;
    let outcome = memory.close(&id).unwrap();
    let result = outcome.consolidation.unwrap();
    assert!(result.patterns.is_empty());
    assert_eq!(result.stats.total_records, 0);
    assert!(outcome.merge.unwrap().is_noop());
}

#[test]
fn test_reconsolidation_does_not_double_count() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
    for step in 1..=3 {
        memory
            .record(&id, "A", "B", MessageKind::Request, json!(null), "", step)
            .unwrap();
        memory
            .record(&id, "B", "A", MessageKind::Response, json!(null), "", step)
            .unwrap();
    }
    let first = memory.close(&id).unwrap().consolidation.unwrap();
    let before = memory.patterns(None).unwrap();
    assert_eq!(before[0].count, 3);

    let (again, merge) = memory.reconsolidate(&id).unwrap();
    assert_eq!(again, first);
    assert!(merge.is_noop());
    assert_eq!(memory.patterns(None).unwrap(), before);
}

#[test]
fn test_reconsolidate_requires_closed_session() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &[]).unwrap().session.id;
    assert!(memory.reconsolidate(&id).is_err());
    assert!(memory.reconsolidate(&SessionId::parse("nope").unwrap()).is_err());
}

#[test]
fn test_patterns_accumulate_across_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    for _ in 0..3 {
        let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
        memory
            .record(&id, "A", "B", MessageKind::Delegation, json!(null), "", 1)
            .unwrap();
        memory
            .record(&id, "B", "A", MessageKind::Response, json!(null), "", 2)
            .unwrap();
        memory.close(&id).unwrap();
    }
    let entries = memory.patterns(None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].count, 3);
    assert_eq!(entries[0].sessions.len(), 3);
}

#[test]
fn test_close_twice_is_invalid_state() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &[]).unwrap().session.id;
    memory.close(&id).unwrap();
    assert!(matches!(
        memory.close(&id).unwrap_err(),
        CoreError::InvalidState { .. }
    ));
    assert!(matches!(
        memory.close(&SessionId::parse("missing").unwrap()).unwrap_err(),
        CoreError::NotFound { .. }
    ));
}

#[test]
fn test_startup_sweep_recovers_and_isolates_corruption() {
    let tmp = tempfile::tempdir().unwrap();
    let (torn, broken) = {
        let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
        let torn = memory.open_session("proj", "", &agents()).unwrap().session.id;
        let broken = memory.open_session("proj", "", &agents()).unwrap().session.id;
        for id in [&torn, &broken] {
            for step in 1..=3 {
                memory
                    .record(id, "A", "B", MessageKind::Notification, json!(step), "", step)
                    .unwrap();
            }
        }
        (torn, broken)
    };

    let sessions = tmp.path().join("sessions");
    let mut file = OpenOptions::new()
        .append(true)
        .open(sessions.join(torn.as_str()).join("trace.log"))
        .unwrap();
    file.write_all(&[42, 0, 0, 0, 1, 2, 3]).unwrap();
    drop(file);

    let trace = sessions.join(broken.as_str()).join("trace.log");
    let mut bytes = std::fs::read(&trace).unwrap();
    bytes[38] ^= 0x01;
    std::fs::write(&trace, bytes).unwrap();

    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let mut sweep = memory.recover_open_sessions().unwrap();
    sweep.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    assert_eq!(sweep.len(), 2);
    for entry in &sweep {
        if entry.session_id == torn {
            match &entry.outcome {
                SweepOutcome::Recovered { report } => {
                    assert_eq!(report.last_seq, 3);
                    assert_eq!(report.discarded_bytes, 7);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        } else {
            assert!(matches!(entry.outcome, SweepOutcome::Aborted { .. }));
        }
    }

    assert_eq!(memory.get(&broken).unwrap().status(), SessionStatus::Aborted);
    // The healthy session keeps going where it left off.
    let seq = memory
        .record(&torn, "B", "A", MessageKind::Notification, json!(null), "", 4)
        .unwrap();
    assert_eq!(seq, 4);

    // Aborted sessions are purge-eligible right away.
    let report = memory.purge(chrono::Duration::days(-1), false).unwrap();
    assert_eq!(report.purged, vec![broken]);
}

#[test]
fn test_failed_consolidation_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
    memory
        .record(&id, "A", "B", MessageKind::Request, json!(null), "", 1)
        .unwrap();

    // Make the pattern store unreadable so the merge step fails.
    std::fs::write(tmp.path().join("patterns").join("patterns.json"), b"not json").unwrap();

    let outcome = memory.close(&id).unwrap();
    assert_eq!(outcome.handle.status(), SessionStatus::Closed);
    assert!(outcome.consolidation.is_err());
    assert!(outcome.merge.is_none());
    assert!(matches!(
        outcome.handle.session.consolidation,
        ConsolidationState::Failed { .. }
    ));
    assert!(outcome.handle.session.is_purge_eligible());
}

#[test]
fn test_sweep_finishes_consolidation_interrupted_by_crash() {
    let tmp = tempfile::tempdir().unwrap();
    let id = {
        let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
        let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
        memory
            .record(&id, "A", "B", MessageKind::Request, json!(null), "", 1)
            .unwrap();
        memory
            .record(&id, "B", "A", MessageKind::Response, json!(null), "", 1)
            .unwrap();
        // Closed on disk, but the process died before consolidating.
        memory.store().close(&id).unwrap();
        id
    };

    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    assert_eq!(
        memory.get(&id).unwrap().session.consolidation,
        ConsolidationState::Pending
    );

    let sweep = memory.recover_open_sessions().unwrap();
    assert_eq!(sweep.len(), 1);
    assert_eq!(sweep[0].session_id, id);
    match &sweep[0].outcome {
        SweepOutcome::Consolidated { patterns, merge } => {
            assert_eq!(*patterns, 1);
            assert_eq!(merge.created, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        memory.get(&id).unwrap().session.consolidation,
        ConsolidationState::Completed { patterns: 1, .. }
    ));
    assert_eq!(memory.patterns(Some(("A", "B"))).unwrap().len(), 1);

    // Nothing left to do on the next start.
    assert!(memory.recover_open_sessions().unwrap().is_empty());
}

#[test]
fn test_transient_merge_failure_keeps_session_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = TraceMemory::with_config(tmp.path(), quick_config()).unwrap();
    let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
    memory
        .record(&id, "A", "B", MessageKind::Request, json!(null), "", 1)
        .unwrap();

    // Another process is merging into the pattern store.
    let holder = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(tmp.path().join("patterns").join("patterns.lock"))
        .unwrap();
    fs2::FileExt::try_lock_exclusive(&holder).unwrap();

    let outcome = memory.close(&id).unwrap();
    assert_eq!(outcome.handle.status(), SessionStatus::Closed);
    let err = outcome.consolidation.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(outcome.handle.session.consolidation, ConsolidationState::Pending);
    assert!(!outcome.handle.session.is_purge_eligible());

    // The raw log survives a purge while its patterns are unmerged.
    let report = memory.purge(chrono::Duration::days(-1), false).unwrap();
    assert!(report.purged.is_empty());

    drop(holder);
    let sweep = memory.recover_open_sessions().unwrap();
    assert!(matches!(sweep[0].outcome, SweepOutcome::Consolidated { .. }));
    assert_eq!(memory.patterns(None).unwrap().len(), 1);

    let report = memory.purge(chrono::Duration::days(-1), false).unwrap();
    assert_eq!(report.purged, vec![id]);
}

#[test]
fn test_concurrent_sessions_through_shared_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = Arc::new(TraceMemory::with_config(tmp.path(), quick_config()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let memory = Arc::clone(&memory);
            thread::spawn(move || {
                let id = memory.open_session("proj", "", &agents()).unwrap().session.id;
                for step in 1..=5 {
                    memory
                        .record(&id, "A", "B", MessageKind::Request, json!(null), "", step)
                        .unwrap();
                    memory
                        .record(&id, "B", "A", MessageKind::Response, json!(null), "", step)
                        .unwrap();
                }
                memory.close(&id).unwrap().handle.last_seq
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 10);
    }

    let entries = memory.patterns(Some(("A", "B"))).unwrap();
    assert_eq!(entries[0].count, 20);
    assert_eq!(entries[0].sessions.len(), 4);
}
