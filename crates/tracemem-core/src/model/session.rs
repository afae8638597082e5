use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CorruptionPoint};

/// A unique identifier for a session.
/// Generated as `<yyyymmddTHHMMSS>-<8 hex>`, so ids sort by creation time.
///
/// Ids name directories on disk, so every constructor validates them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Build an id for the given creation instant with a fresh random suffix.
    pub fn at(created_at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().as_simple().to_string();
        Self(format!(
            "{}-{}",
            created_at.format("%Y%m%dT%H%M%S"),
            &suffix[..8]
        ))
    }

    /// Parse and validate an id string. Ids become directory names, so path
    /// separators and dot-only names are rejected.
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            return Err(CoreError::InvalidArgument("session id is empty".into()));
        }
        if s == "." || s == ".." {
            return Err(CoreError::InvalidArgument(format!(
                "session id '{s}' is not a valid name"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(CoreError::InvalidArgument(format!(
                "session id '{s}' contains invalid characters"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
    Aborted,
}

impl SessionStatus {
    /// Status only moves forward: `open -> closed` or `open -> aborted`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Open, SessionStatus::Closed) | (SessionStatus::Open, SessionStatus::Aborted)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
            SessionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Why a session ended up `aborted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Recovery found a gap or damaged frame before the last good record.
    Corruption { point: CorruptionPoint },
    /// The orchestration layer gave up on the session.
    Requested { reason: String },
}

/// Progress of the consolidation pass for a closed session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConsolidationState {
    #[default]
    Pending,
    Completed {
        at: DateTime<Utc>,
        patterns: usize,
    },
    Failed {
        at: DateTime<Utc>,
        reason: String,
    },
}

/// Session metadata, stored as session.json in the session directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: String,
    #[serde(default)]
    pub goal: String,
    /// Participating agents, in the order the caller declared them.
    pub agents: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReason>,
    /// Highest sequence number confirmed by the last recovery scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_through: Option<u64>,
    #[serde(default)]
    pub consolidation: ConsolidationState,
}

impl Session {
    /// A session's raw log may be purged once its knowledge has been folded
    /// into the pattern store, or once it has been given up on.
    pub fn is_purge_eligible(&self) -> bool {
        match self.status {
            SessionStatus::Open => false,
            SessionStatus::Aborted => true,
            SessionStatus::Closed => !matches!(self.consolidation, ConsolidationState::Pending),
        }
    }
}

/// Read-only view of a session returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session: Session,
    /// Highest durable sequence number, 0 when nothing has been recorded.
    pub last_seq: u64,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generation() {
        let id = SessionId::new();
        // 15 chars of timestamp, a dash, 8 hex chars
        assert_eq!(id.as_str().len(), 24);
        assert!(SessionId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_session_ids_do_not_collide() {
        let now = Utc::now();
        let a = SessionId::at(now);
        let b = SessionId::at(now);
        assert_ne!(a, b);
        assert_eq!(&a.as_str()[..15], &b.as_str()[..15]);
    }

    #[test]
    fn test_session_id_parse_validation() {
        assert!(SessionId::parse("20260101T000000-abcdef12").is_ok());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("..").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("a b").is_err());
        assert!("../escape".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_deserialize_validates() {
        let ok: SessionId = serde_json::from_str("\"20260101T000000-abcdef12\"").unwrap();
        assert_eq!(ok.as_str(), "20260101T000000-abcdef12");
        assert!(serde_json::from_str::<SessionId>("\"../../etc\"").is_err());
        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
    }

    #[test]
    fn test_status_is_monotonic() {
        use SessionStatus::*;
        assert!(Open.can_transition_to(Closed));
        assert!(Open.can_transition_to(Aborted));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Aborted.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Aborted));
        assert!(!Open.can_transition_to(Open));
    }

    #[test]
    fn test_purge_eligibility() {
        let mut session = Session {
            id: SessionId::new(),
            project_id: "proj".into(),
            goal: String::new(),
            agents: vec!["a".into()],
            created_at: Utc::now(),
            status: SessionStatus::Open,
            ended_at: None,
            abort: None,
            recovered_through: None,
            consolidation: ConsolidationState::Pending,
        };
        assert!(!session.is_purge_eligible());

        session.status = SessionStatus::Closed;
        assert!(!session.is_purge_eligible());

        session.consolidation = ConsolidationState::Failed {
            at: Utc::now(),
            reason: "boom".into(),
        };
        assert!(session.is_purge_eligible());

        session.status = SessionStatus::Aborted;
        session.consolidation = ConsolidationState::Pending;
        assert!(session.is_purge_eligible());
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let session = Session {
            id: SessionId::new(),
            project_id: "proj".into(),
            goal: "ship it".into(),
            agents: vec!["SystemAgent".into(), "VisionaryAgent".into()],
            created_at: Utc::now(),
            status: SessionStatus::Aborted,
            ended_at: Some(Utc::now()),
            abort: Some(AbortReason::Corruption {
                point: CorruptionPoint {
                    offset: 120,
                    expected_seq: 3,
                    detail: "found seq 4".into(),
                },
            }),
            recovered_through: Some(2),
            consolidation: ConsolidationState::Pending,
        };
        let json = serde_json::to_string_pretty(&session).unwrap();
        assert!(json.contains("\"status\": \"aborted\""));
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, parsed);
    }
}
