use std::fs::OpenOptions;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracemem_core::error::CoreError;
use tracemem_core::model::{MessageKind, RecordDraft, SessionId};
use tracemem_core::storage::{Layout, SessionStore};
use tracemem_core::{TraceMemoryConfig, TraceRecorder};

fn setup() -> (TempDir, Arc<SessionStore>, TraceRecorder) {
    let tmp = TempDir::new().unwrap();
    let store =
        Arc::new(SessionStore::new(Layout::new(tmp.path()), &TraceMemoryConfig::default()).unwrap());
    let recorder = TraceRecorder::new(Arc::clone(&store));
    (tmp, store, recorder)
}

fn hammer(recorder: &TraceRecorder, id: &SessionId, threads: usize, per_thread: usize) -> Vec<u64> {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let recorder = recorder.clone();
            let id = id.clone();
            thread::spawn(move || {
                (0..per_thread)
                    .map(|i| {
                        recorder
                            .record(
                                &id,
                                &format!("agent-{t}"),
                                "sink",
                                MessageKind::Notification,
                                serde_json::json!({ "i": i }),
                                "",
                                i as u64,
                            )
                            .unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();
    let mut seqs: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seqs.sort_unstable();
    seqs
}

#[test]
fn test_concurrent_writers_get_gap_free_sequence() {
    let (_tmp, store, recorder) = setup();
    let handle = store.open("proj", "", &[]).unwrap();
    let id = handle.id().clone();

    let seqs = hammer(&recorder, &id, 8, 25);
    assert_eq!(seqs, (1..=200).collect::<Vec<u64>>());

    // On disk the log is in sequence order as well.
    let log = store.read_log(&id).unwrap();
    let on_disk: Vec<u64> = log.records.iter().map(|r| r.seq).collect();
    assert_eq!(on_disk, (1..=200).collect::<Vec<u64>>());
    assert!(log.unreadable_tail.is_none());
}

#[test]
fn test_sessions_are_sequenced_independently() {
    let (_tmp, store, recorder) = setup();
    let ids: Vec<SessionId> = (0..4)
        .map(|_| store.open("proj", "", &[]).unwrap().session.id)
        .collect();

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let recorder = recorder.clone();
            thread::spawn(move || hammer(&recorder, &id, 3, 10))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), (1..=30).collect::<Vec<u64>>());
    }
    for id in &ids {
        assert_eq!(store.close(id).unwrap().last_seq, 30);
    }
}

#[test]
fn test_blocked_reattach_does_not_stall_other_sessions() {
    let tmp = TempDir::new().unwrap();
    let mut config = TraceMemoryConfig::default();
    config.retry.base_delay_ms = 200;
    config.retry.max_delay_ms = 400;

    // A session left open by an earlier store.
    let stale = {
        let earlier = SessionStore::new(Layout::new(tmp.path()), &config).unwrap();
        earlier.open("proj", "", &[]).unwrap().session.id
    };

    let store = Arc::new(SessionStore::new(Layout::new(tmp.path()), &config).unwrap());
    let live = store.open("proj", "", &[]).unwrap().session.id;

    // Some other process owns the stale session's writer.
    let lock_path = tmp
        .path()
        .join("sessions")
        .join(stale.as_str())
        .join("writer.lock");
    let foreign = OpenOptions::new().write(true).open(&lock_path).unwrap();
    fs2::FileExt::try_lock_exclusive(&foreign).unwrap();

    let attaching = {
        let store = Arc::clone(&store);
        let stale = stale.clone();
        thread::spawn(move || {
            store.append(&stale, RecordDraft::new("A", "B", MessageKind::Request, 1))
        })
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let record = store
        .append(&live, RecordDraft::new("A", "B", MessageKind::Request, 1))
        .unwrap();
    assert_eq!(record.seq, 1);
    assert!(store.get(&live).is_ok());
    assert!(
        started.elapsed() < Duration::from_millis(150),
        "unrelated session waited {:?}",
        started.elapsed()
    );

    let err = attaching.join().unwrap().unwrap_err();
    assert!(matches!(err, CoreError::StorageUnavailable { .. }));
    assert!(!store.is_attached(&stale));
}
