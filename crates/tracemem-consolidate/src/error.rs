use tracemem_core::error::CoreError;
use tracemem_core::model::{SessionId, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ConsolidateError {
    #[error("Session {id} is {status}, only closed sessions are consolidated")]
    NotClosed { id: SessionId, status: SessionStatus },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl ConsolidateError {
    /// True when the failure was a transient storage problem and the same
    /// session can be consolidated again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsolidateError::Core(e) if e.is_retryable())
    }
}
