pub mod consolidation;
pub mod pattern;
pub mod record;
pub mod session;

pub use consolidation::{
    ConsolidationResult, InteractionPattern, KnowledgeGap, Outcome, PairStats, SummaryStats,
    Unanalyzed,
};
pub use pattern::{Contribution, DecayPolicy, PatternEntry, PatternKey};
pub use record::{CommunicationRecord, MessageKind, RecordDraft};
pub use session::{
    AbortReason, ConsolidationState, Session, SessionHandle, SessionId, SessionStatus,
};

/// A session's metadata plus every record that could be read from its log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLog {
    pub session: Session,
    pub records: Vec<CommunicationRecord>,
    /// Set when reading stopped before the end of the file.
    pub unreadable_tail: Option<crate::error::CorruptionPoint>,
}

impl SessionLog {
    pub fn last_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq).unwrap_or(0)
    }
}
