use thiserror::Error;

use crate::model::{SessionId, SessionStatus};

/// Where a session log stopped being trustworthy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CorruptionPoint {
    /// Byte offset of the first frame that could not be accepted.
    pub offset: u64,
    /// The sequence number the scanner expected at that offset.
    pub expected_seq: u64,
    pub detail: String,
}

impl std::fmt::Display for CorruptionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "offset {} (expected seq {}): {}",
            self.offset, self.expected_seq, self.detail
        )
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Session already exists: {id}")]
    DuplicateSession { id: SessionId },

    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session {id} is {actual}, operation requires {required}")]
    InvalidState {
        id: SessionId,
        actual: SessionStatus,
        required: SessionStatus,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage unavailable during {operation} after {attempts} attempt(s): {source}")]
    StorageUnavailable {
        operation: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Session log for {id} is corrupt at {point}")]
    Corruption { id: SessionId, point: CorruptionPoint },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// True only for transient storage failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable { .. })
    }
}
