use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{CommunicationRecord, MessageKind, RecordDraft, SessionId};
use crate::storage::SessionStore;

/// Validates inter-agent events and appends them to their session's log.
///
/// Every call returns only after the record is durable. Calls for the same
/// session are served in arrival order; calls for different sessions run in
/// parallel.
#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<SessionStore>,
}

impl TraceRecorder {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Append one communication event and return its sequence number.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        session_id: &SessionId,
        from_agent: &str,
        to_agent: &str,
        kind: MessageKind,
        content: serde_json::Value,
        context_snapshot: &str,
        step: u64,
    ) -> Result<u64, CoreError> {
        let draft = RecordDraft::new(from_agent, to_agent, kind, step)
            .content(content)
            .context(context_snapshot);
        Ok(self.record_draft(session_id, draft)?.seq)
    }

    /// Like [`record`](Self::record) with the kind given as text, for
    /// callers that receive it from outside the type system.
    #[allow(clippy::too_many_arguments)]
    pub fn record_str(
        &self,
        session_id: &SessionId,
        from_agent: &str,
        to_agent: &str,
        kind: &str,
        content: serde_json::Value,
        context_snapshot: &str,
        step: u64,
    ) -> Result<u64, CoreError> {
        let kind: MessageKind = kind.parse()?;
        self.record(
            session_id,
            from_agent,
            to_agent,
            kind,
            content,
            context_snapshot,
            step,
        )
    }

    pub fn record_draft(
        &self,
        session_id: &SessionId,
        draft: RecordDraft,
    ) -> Result<CommunicationRecord, CoreError> {
        self.store.append(session_id, draft)
    }
}
