use std::fs::{self, OpenOptions};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::codec::{scan_frames, FrameScan, ScanStop};
use super::layout::Layout;
use super::retry::RetryPolicy;
use super::session_store::persist_session;
use crate::error::CoreError;
use crate::model::{AbortReason, Session, SessionId, SessionStatus};

/// What a recovery pass found and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub session_id: SessionId,
    /// Highest fully written, checksummed record.
    pub last_seq: u64,
    /// Length of the log after recovery.
    pub valid_len: u64,
    /// Bytes of an incomplete trailing record that were cut off.
    pub discarded_bytes: u64,
    /// False when the log and metadata were already consistent.
    pub changed: bool,
}

/// Detects and repairs logs that were not cleanly closed.
///
/// A torn trailing frame is the normal footprint of a crash mid-append and is
/// cut off silently. Anything else that breaks the chain of checksummed,
/// contiguous sequence numbers is corruption: the session is aborted with the
/// corruption point recorded and the file is left as it is.
#[derive(Debug, Clone)]
pub struct RecoveryScanner {
    layout: Layout,
    max_frame_bytes: u32,
    retry: RetryPolicy,
}

impl RecoveryScanner {
    pub fn new(layout: Layout, max_frame_bytes: u32, retry: RetryPolicy) -> Self {
        Self {
            layout,
            max_frame_bytes,
            retry,
        }
    }

    /// Read-only scan of a session's log. A missing log reads as empty.
    pub fn inspect(&self, id: &SessionId) -> Result<FrameScan, CoreError> {
        let path = self.layout.trace_file(id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(scan_frames(&data, self.max_frame_bytes))
    }

    /// Repair the session's log in place and update its metadata.
    /// The caller must hold the session's writer lock.
    pub(crate) fn repair(&self, session: &mut Session) -> Result<RecoveryReport, CoreError> {
        let id = session.id.clone();
        let scan = self.inspect(&id)?;
        let last_seq = scan.last_seq();
        let mut changed = false;
        let mut discarded_bytes = 0;

        match scan.stop {
            None => {}
            Some(ScanStop::TornTail { offset, bytes }) => {
                tracing::warn!(
                    session_id = %id,
                    offset,
                    bytes,
                    last_seq,
                    "discarding incomplete trailing record"
                );
                let path = self.layout.trace_file(&id);
                self.retry.run("truncate torn record", |_| {
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(offset)?;
                    file.sync_all()
                })?;
                discarded_bytes = bytes;
                changed = true;
            }
            Some(ScanStop::Corrupt(point)) => {
                tracing::error!(
                    session_id = %id,
                    offset = point.offset,
                    expected_seq = point.expected_seq,
                    detail = %point.detail,
                    "session log is corrupt"
                );
                if session.status == SessionStatus::Open {
                    session.status = SessionStatus::Aborted;
                    session.ended_at = Some(Utc::now());
                    session.abort = Some(AbortReason::Corruption {
                        point: point.clone(),
                    });
                    session.recovered_through = Some(last_seq);
                    persist_session(&self.layout, &self.retry, session)?;
                }
                return Err(CoreError::Corruption { id, point });
            }
        }

        if session.recovered_through != Some(last_seq) {
            session.recovered_through = Some(last_seq);
            persist_session(&self.layout, &self.retry, session)?;
            changed = true;
        }

        if changed {
            tracing::info!(session_id = %id, last_seq, discarded_bytes, "session log recovered");
        }
        Ok(RecoveryReport {
            session_id: id,
            last_seq,
            valid_len: scan.valid_len,
            discarded_bytes,
            changed,
        })
    }
}
