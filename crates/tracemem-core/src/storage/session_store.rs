use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use walkdir::WalkDir;

use super::codec::{encode_frame, ScanStop};
use super::layout::{read_json, write_json_atomic, Layout};
use super::lock::FifoMutex;
use super::recovery::{RecoveryReport, RecoveryScanner};
use super::retry::RetryPolicy;
use crate::config::TraceMemoryConfig;
use crate::error::{CoreError, CorruptionPoint};
use crate::model::{
    AbortReason, CommunicationRecord, ConsolidationResult, ConsolidationState, RecordDraft,
    Session, SessionHandle, SessionId, SessionLog, SessionStatus,
};

/// Owns every session directory under `<root>/sessions`.
///
/// Sessions opened (or re-attached) by this process keep a live writer: the
/// open log file, the next sequence number and an fs2 lock on writer.lock
/// that keeps other processes from writing the same session. Appends to one
/// session go through a FIFO lock; different sessions never contend.
pub struct SessionStore {
    layout: Layout,
    retry: RetryPolicy,
    max_frame_bytes: u32,
    scanner: RecoveryScanner,
    live: Mutex<HashMap<SessionId, Arc<LiveSession>>>,
}

struct LiveSession {
    writer: FifoMutex<SessionWriter>,
}

struct SessionWriter {
    session: Session,
    log: File,
    log_len: u64,
    next_seq: u64,
    /// Set when a failed append could not be rolled back; the on-disk tail
    /// is unknown until recovery runs again.
    poisoned: bool,
    _lock: File,
    /// Appends that will write half a frame and then fail.
    #[cfg(test)]
    fail_writes: u32,
}

impl SessionWriter {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            session: self.session.clone(),
            last_seq: self.next_seq - 1,
        }
    }
}

impl SessionStore {
    pub fn new(layout: Layout, config: &TraceMemoryConfig) -> Result<Self, CoreError> {
        config.validate()?;
        layout.ensure()?;
        let scanner = RecoveryScanner::new(
            layout.clone(),
            config.storage.max_frame_bytes,
            config.retry.clone(),
        );
        Ok(Self {
            layout,
            retry: config.retry.clone(),
            max_frame_bytes: config.storage.max_frame_bytes,
            scanner,
            live: Mutex::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn scanner(&self) -> &RecoveryScanner {
        &self.scanner
    }

    /// Create a new `open` session with a generated id.
    pub fn open(
        &self,
        project_id: &str,
        goal: &str,
        agents: &[String],
    ) -> Result<SessionHandle, CoreError> {
        self.open_with_id(SessionId::new(), project_id, goal, agents)
    }

    /// Create a new `open` session with a caller-chosen id.
    pub fn open_with_id(
        &self,
        id: SessionId,
        project_id: &str,
        goal: &str,
        agents: &[String],
    ) -> Result<SessionHandle, CoreError> {
        if project_id.trim().is_empty() {
            return Err(CoreError::InvalidArgument("project id is empty".into()));
        }
        if let Some(bad) = agents.iter().find(|a| a.trim().is_empty()) {
            return Err(CoreError::InvalidArgument(format!(
                "agent list contains an empty id ({bad:?})"
            )));
        }

        let dir = self.layout.session_dir(&id);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CoreError::DuplicateSession { id });
            }
            Err(e) => return Err(e.into()),
        }

        let lock = self.acquire_writer_lock(&id)?;
        let trace_path = self.layout.trace_file(&id);
        let log = self.retry.run("create session log", |_| {
            OpenOptions::new().create(true).append(true).open(&trace_path)
        })?;

        let session = Session {
            id: id.clone(),
            project_id: project_id.to_string(),
            goal: goal.to_string(),
            agents: agents.to_vec(),
            created_at: Utc::now(),
            status: SessionStatus::Open,
            ended_at: None,
            abort: None,
            recovered_through: None,
            consolidation: ConsolidationState::Pending,
        };
        persist_session(&self.layout, &self.retry, &session)?;

        let writer = SessionWriter {
            session: session.clone(),
            log,
            log_len: 0,
            next_seq: 1,
            poisoned: false,
            _lock: lock,
            #[cfg(test)]
            fail_writes: 0,
        };
        self.live_map().insert(
            id.clone(),
            Arc::new(LiveSession {
                writer: FifoMutex::new(writer),
            }),
        );

        tracing::info!(session_id = %id, project_id, agents = agents.len(), "session opened");
        Ok(SessionHandle {
            session,
            last_seq: 0,
        })
    }

    /// Append one record under the session's write lock and return it with
    /// its assigned sequence number. The frame is synced before returning.
    pub fn append(
        &self,
        id: &SessionId,
        draft: RecordDraft,
    ) -> Result<CommunicationRecord, CoreError> {
        draft.validate()?;
        let live = self.writer(id)?;
        let mut guard = live.writer.lock();
        let writer = &mut *guard;

        if writer.session.status != SessionStatus::Open {
            return Err(CoreError::InvalidState {
                id: id.clone(),
                actual: writer.session.status,
                required: SessionStatus::Open,
            });
        }
        if writer.poisoned {
            return Err(CoreError::StorageUnavailable {
                operation: "append record".into(),
                attempts: 0,
                source: std::io::Error::other(
                    "log tail could not be rolled back after a failed write",
                ),
            });
        }

        let seq = writer.next_seq;
        let record = draft.into_record(seq, Utc::now());
        let frame = encode_frame(&record, self.max_frame_bytes)?;
        let base_len = writer.log_len;

        let result = self.retry.run("append record", |attempt| {
            if attempt > 1 {
                writer.log.set_len(base_len)?;
            }
            #[cfg(test)]
            if writer.fail_writes > 0 {
                writer.fail_writes -= 1;
                writer.log.write_all(&frame[..frame.len() / 2])?;
                return Err(std::io::Error::other("injected write failure"));
            }
            writer.log.write_all(&frame)?;
            writer.log.sync_data()
        });

        match result {
            Ok(()) => {
                writer.log_len = base_len + frame.len() as u64;
                writer.next_seq += 1;
                tracing::debug!(
                    session_id = %id,
                    seq,
                    step = record.step,
                    kind = %record.kind,
                    "record appended"
                );
                Ok(record)
            }
            Err(e) => {
                let rolled_back = writer
                    .log
                    .set_len(base_len)
                    .and_then(|()| writer.log.sync_data());
                if rolled_back.is_err() {
                    tracing::error!(session_id = %id, "could not roll back failed append");
                    writer.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Flush and mark the session `closed`. The metadata update is atomic: on
    /// failure the session stays `open`.
    pub fn close(&self, id: &SessionId) -> Result<SessionHandle, CoreError> {
        let live = self.writer(id)?;
        let mut guard = live.writer.lock();
        let writer = &mut *guard;
        if !writer.session.status.can_transition_to(SessionStatus::Closed) {
            return Err(CoreError::InvalidState {
                id: id.clone(),
                actual: writer.session.status,
                required: SessionStatus::Open,
            });
        }

        self.retry
            .run("flush session log", |_| writer.log.sync_all())?;

        let mut closed = writer.session.clone();
        closed.status = SessionStatus::Closed;
        closed.ended_at = Some(Utc::now());
        closed.consolidation = ConsolidationState::Pending;
        persist_session(&self.layout, &self.retry, &closed)?;

        writer.session = closed;
        let handle = writer.handle();
        drop(guard);
        self.live_map().remove(id);

        tracing::info!(session_id = %id, last_seq = handle.last_seq, "session closed");
        Ok(handle)
    }

    /// Explicitly give up on an open session.
    pub fn abort(&self, id: &SessionId, reason: &str) -> Result<SessionHandle, CoreError> {
        let live = match self.writer(id) {
            Ok(live) => live,
            // Re-attaching ran recovery, which already aborted the session.
            Err(CoreError::Corruption { .. }) => return self.get(id),
            Err(e) => return Err(e),
        };
        let mut guard = live.writer.lock();
        let writer = &mut *guard;
        if !writer.session.status.can_transition_to(SessionStatus::Aborted) {
            return Err(CoreError::InvalidState {
                id: id.clone(),
                actual: writer.session.status,
                required: SessionStatus::Open,
            });
        }

        // Best effort: the session is being abandoned anyway.
        let _ = writer.log.sync_all();

        let mut aborted = writer.session.clone();
        aborted.status = SessionStatus::Aborted;
        aborted.ended_at = Some(Utc::now());
        aborted.abort = Some(AbortReason::Requested {
            reason: reason.to_string(),
        });
        persist_session(&self.layout, &self.retry, &aborted)?;

        writer.session = aborted;
        let handle = writer.handle();
        drop(guard);
        self.live_map().remove(id);

        tracing::info!(session_id = %id, reason, "session aborted");
        Ok(handle)
    }

    /// Read-only lookup.
    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, CoreError> {
        let live = self.live_map().get(id).cloned();
        if let Some(live) = live {
            let handle = live.writer.lock().handle();
            return Ok(handle);
        }
        let session = self.load_session(id)?;
        let scan = self.scanner.inspect(id)?;
        Ok(SessionHandle {
            session,
            last_seq: scan.last_seq(),
        })
    }

    /// All sessions on disk, most recent first. Unreadable sessions are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<Session>, CoreError> {
        let dir = self.layout.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Skipping unreadable session entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let id = match SessionId::parse(name) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping session directory: {e}");
                    continue;
                }
            };
            match self.load_session(&id) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(session_id = %id, "Skipping unreadable session: {e}"),
            }
        }

        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(sessions)
    }

    /// Sessions whose metadata still says `open`, including ones left behind
    /// by an earlier process.
    pub fn list_open(&self) -> Result<Vec<SessionHandle>, CoreError> {
        let mut handles = Vec::new();
        for session in self.list()? {
            if session.status == SessionStatus::Open {
                handles.push(self.get(&session.id)?);
            }
        }
        Ok(handles)
    }

    /// Whether this process currently owns the session's writer.
    pub fn is_attached(&self, id: &SessionId) -> bool {
        self.live_map().contains_key(id)
    }

    /// Run recovery on a session log. Sessions attached to this process are
    /// consistent by construction and are reported unchanged.
    pub fn recover(&self, id: &SessionId) -> Result<RecoveryReport, CoreError> {
        let live = self.live_map().get(id).cloned();
        if let Some(live) = live {
            let writer = live.writer.lock();
            return Ok(RecoveryReport {
                session_id: id.clone(),
                last_seq: writer.next_seq - 1,
                valid_len: writer.log_len,
                discarded_bytes: 0,
                changed: false,
            });
        }

        self.load_session(id)?;
        let _lock = self.acquire_writer_lock(id)?;
        let mut session = self.load_session(id)?;
        self.scanner.repair(&mut session)
    }

    /// The full log of a session. A session left `open` by another process
    /// lifetime is recovered first.
    pub fn read_log(&self, id: &SessionId) -> Result<SessionLog, CoreError> {
        let live = self.live_map().get(id).cloned();
        if let Some(live) = live {
            let writer = live.writer.lock();
            let scan = self.scanner.inspect(id)?;
            return Ok(to_session_log(writer.session.clone(), scan));
        }

        let session = self.load_session(id)?;
        if session.status == SessionStatus::Open {
            match self.recover(id) {
                Ok(_) | Err(CoreError::Corruption { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let session = self.load_session(id)?;
        let scan = self.scanner.inspect(id)?;
        Ok(to_session_log(session, scan))
    }

    /// Record consolidation progress for a closed session.
    pub fn set_consolidation_state(
        &self,
        id: &SessionId,
        state: ConsolidationState,
    ) -> Result<Session, CoreError> {
        ensure_closed(&self.load_session(id)?)?;
        let _lock = self.acquire_writer_lock(id)?;
        let mut session = self.load_session(id)?;
        ensure_closed(&session)?;
        session.consolidation = state;
        persist_session(&self.layout, &self.retry, &session)?;
        Ok(session)
    }

    pub fn save_consolidation(
        &self,
        id: &SessionId,
        result: &ConsolidationResult,
    ) -> Result<(), CoreError> {
        let path = self.layout.consolidation_file(id);
        self.retry
            .run("write consolidation result", |_| write_json_atomic(&path, result))
    }

    pub fn load_consolidation(
        &self,
        id: &SessionId,
    ) -> Result<Option<ConsolidationResult>, CoreError> {
        let path = self.layout.consolidation_file(id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Remove a purge-eligible session directory.
    pub fn purge(&self, id: &SessionId) -> Result<(), CoreError> {
        let session = self.load_session(id)?;
        if session.status == SessionStatus::Open {
            return Err(CoreError::InvalidState {
                id: id.clone(),
                actual: session.status,
                required: SessionStatus::Closed,
            });
        }
        if !session.is_purge_eligible() {
            return Err(CoreError::InvalidArgument(format!(
                "session {id} is still waiting for consolidation"
            )));
        }

        let _lock = self.acquire_writer_lock(id)?;
        let dir = self.layout.session_dir(id);
        self.retry.run("purge session", |_| fs::remove_dir_all(&dir))?;
        tracing::info!(session_id = %id, "session purged");
        Ok(())
    }

    /// Look up the live writer, attaching one (after recovery) for a session
    /// left `open` on disk.
    fn writer(&self, id: &SessionId) -> Result<Arc<LiveSession>, CoreError> {
        if let Some(existing) = self.live_map().get(id) {
            return Ok(Arc::clone(existing));
        }

        // Attaching does I/O and may back off on the writer lock, so it runs
        // without the live map held.
        let session = self.load_session(id)?;
        ensure_open(&session)?;

        let lock = match self.acquire_writer_lock(id) {
            Ok(lock) => lock,
            Err(e) => {
                // Another thread of this process may have attached meanwhile.
                if let Some(existing) = self.live_map().get(id) {
                    return Ok(Arc::clone(existing));
                }
                return Err(e);
            }
        };
        // Re-read under the lock: another process may have moved it on.
        let mut session = self.load_session(id)?;
        ensure_open(&session)?;
        let report = self.scanner.repair(&mut session)?;

        let trace_path = self.layout.trace_file(id);
        let log = self.retry.run("open session log", |_| {
            OpenOptions::new().create(true).append(true).open(&trace_path)
        })?;

        let writer = SessionWriter {
            session,
            log,
            log_len: report.valid_len,
            next_seq: report.last_seq + 1,
            poisoned: false,
            _lock: lock,
            #[cfg(test)]
            fail_writes: 0,
        };
        let attached = Arc::new(LiveSession {
            writer: FifoMutex::new(writer),
        });
        let attached = Arc::clone(
            self.live_map()
                .entry(id.clone())
                .or_insert(attached),
        );

        tracing::info!(
            session_id = %id,
            last_seq = report.last_seq,
            "re-attached session writer after recovery"
        );
        Ok(attached)
    }

    fn load_session(&self, id: &SessionId) -> Result<Session, CoreError> {
        let path = self.layout.session_file(id);
        if !path.exists() {
            return Err(CoreError::NotFound {
                id: id.to_string(),
            });
        }
        read_json(&path)
    }

    fn acquire_writer_lock(&self, id: &SessionId) -> Result<File, CoreError> {
        let path = self.layout.writer_lock_file(id);
        self.retry.run("lock session writer", |_| {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            fs2::FileExt::try_lock_exclusive(&file)?;
            Ok(file)
        })
    }

    fn live_map(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<LiveSession>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Atomically replace a session's metadata file.
pub(crate) fn persist_session(
    layout: &Layout,
    retry: &RetryPolicy,
    session: &Session,
) -> Result<(), CoreError> {
    let path = layout.session_file(&session.id);
    retry.run("write session metadata", |_| write_json_atomic(&path, session))
}

fn ensure_open(session: &Session) -> Result<(), CoreError> {
    if session.status == SessionStatus::Open {
        Ok(())
    } else {
        Err(CoreError::InvalidState {
            id: session.id.clone(),
            actual: session.status,
            required: SessionStatus::Open,
        })
    }
}

fn ensure_closed(session: &Session) -> Result<(), CoreError> {
    if session.status == SessionStatus::Closed {
        Ok(())
    } else {
        Err(CoreError::InvalidState {
            id: session.id.clone(),
            actual: session.status,
            required: SessionStatus::Closed,
        })
    }
}

fn to_session_log(session: Session, scan: super::codec::FrameScan) -> SessionLog {
    let next_seq = scan.last_seq() + 1;
    let unreadable_tail = scan.stop.map(|stop| match stop {
        ScanStop::TornTail { offset, bytes } => CorruptionPoint {
            offset,
            expected_seq: next_seq,
            detail: format!("{bytes} trailing bytes of an incomplete record"),
        },
        ScanStop::Corrupt(point) => point,
    });
    SessionLog {
        session,
        records: scan.records,
        unreadable_tail,
    }
}

#[cfg(test)]
impl SessionStore {
    fn fail_next_writes(&self, id: &SessionId, n: u32) {
        self.writer(id).unwrap().writer.lock().fail_writes = n;
    }

    fn replace_log(&self, id: &SessionId, log: File) {
        self.writer(id).unwrap().writer.lock().log = log;
    }
}
