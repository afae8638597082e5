//! Record inter-agent traffic durably and learn from it across sessions.
//!
//! # Example
//! ```no_run
//! use tracemem_sdk::{MessageKind, TraceMemory};
//!
//! let memory = TraceMemory::open(".tracemem").unwrap();
//! memory.recover_open_sessions().unwrap();
//!
//! let agents = vec!["planner".to_string(), "coder".to_string()];
//! let session = memory.open_session("web-app", "add login", &agents).unwrap();
//! let id = session.id().clone();
//! memory
//!     .record(&id, "planner", "coder", MessageKind::Delegation, serde_json::json!({"task": "login form"}), "", 1)
//!     .unwrap();
//! memory
//!     .record(&id, "coder", "planner", MessageKind::Response, serde_json::json!({"status": "done"}), "", 1)
//!     .unwrap();
//!
//! let outcome = memory.close(&id).unwrap();
//! for pattern in outcome.consolidation.unwrap().patterns {
//!     println!("{} x{}", pattern.outcome, pattern.occurrences);
//! }
//! ```

mod memory;

pub use memory::{CloseOutcome, PurgeReport, SweepEntry, SweepOutcome, TraceMemory};

// Re-export the types SDK users need
pub use tracemem_consolidate::{ConsolidateError, ConsolidationEngine};
pub use tracemem_core::error::{CoreError, CorruptionPoint};
pub use tracemem_core::model::{
    AbortReason, CommunicationRecord, ConsolidationResult, ConsolidationState, DecayPolicy,
    MessageKind, Outcome, PatternEntry, RecordDraft, Session, SessionHandle, SessionId,
    SessionLog, SessionStatus,
};
pub use tracemem_core::storage::{MergeReport, RecoveryReport};
pub use tracemem_core::TraceMemoryConfig;
