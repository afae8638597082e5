use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
    Delegation,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::Request,
        MessageKind::Response,
        MessageKind::Notification,
        MessageKind::Error,
        MessageKind::Delegation,
    ];

    /// Kinds that open an exchange and expect a response.
    pub fn opens_exchange(self) -> bool {
        matches!(self, MessageKind::Request | MessageKind::Delegation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
            MessageKind::Error => "error",
            MessageKind::Delegation => "delegation",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(MessageKind::Request),
            "response" => Ok(MessageKind::Response),
            "notification" => Ok(MessageKind::Notification),
            "error" => Ok(MessageKind::Error),
            "delegation" => Ok(MessageKind::Delegation),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown message kind '{other}' (expected request, response, notification, error or delegation)"
            ))),
        }
    }
}

/// One immutable entry in a session trace, encoded as the payload of one
/// frame in trace.log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub from_agent: String,
    pub to_agent: String,
    pub kind: MessageKind,
    /// Opaque payload, never interpreted while recording.
    pub content: serde_json::Value,
    #[serde(default)]
    pub context_snapshot: String,
    pub step: u64,
}

/// The caller-supplied part of a record; the recorder assigns `seq` and
/// `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub from_agent: String,
    pub to_agent: String,
    pub kind: MessageKind,
    pub content: serde_json::Value,
    pub context_snapshot: String,
    pub step: u64,
}

impl RecordDraft {
    pub fn new(from_agent: &str, to_agent: &str, kind: MessageKind, step: u64) -> Self {
        Self {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            kind,
            content: serde_json::Value::Null,
            context_snapshot: String::new(),
            step,
        }
    }

    pub fn content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn context(mut self, snapshot: &str) -> Self {
        self.context_snapshot = snapshot.to_string();
        self
    }

    /// Reject malformed agent ids before anything touches the log.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_agent_id("from_agent", &self.from_agent)?;
        validate_agent_id("to_agent", &self.to_agent)?;
        Ok(())
    }

    pub(crate) fn into_record(self, seq: u64, timestamp: DateTime<Utc>) -> CommunicationRecord {
        CommunicationRecord {
            seq,
            timestamp,
            from_agent: self.from_agent,
            to_agent: self.to_agent,
            kind: self.kind,
            content: self.content,
            context_snapshot: self.context_snapshot,
            step: self.step,
        }
    }
}

fn validate_agent_id(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidArgument(format!("{field} is empty")));
    }
    if value.chars().any(char::is_control) {
        return Err(CoreError::InvalidArgument(format!(
            "{field} contains control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("request".parse::<MessageKind>().unwrap(), MessageKind::Request);
        assert_eq!(" Delegation ".parse::<MessageKind>().unwrap(), MessageKind::Delegation);
        let err = "query".parse::<MessageKind>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&MessageKind::Notification).unwrap();
        assert_eq!(json, "\"notification\"");
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected_by_serde() {
        let json = r#"{"seq":1,"timestamp":"2026-01-01T00:00:00Z","from_agent":"a","to_agent":"b","kind":"gossip","content":null,"step":1}"#;
        assert!(serde_json::from_str::<CommunicationRecord>(json).is_err());
    }

    #[test]
    fn test_draft_validation() {
        assert!(RecordDraft::new("a", "b", MessageKind::Request, 1).validate().is_ok());
        assert!(RecordDraft::new("", "b", MessageKind::Request, 1).validate().is_err());
        assert!(RecordDraft::new("a", "  ", MessageKind::Request, 1).validate().is_err());
        assert!(RecordDraft::new("a\n", "b", MessageKind::Request, 1).validate().is_err());
    }

    #[test]
    fn test_draft_into_record() {
        let draft = RecordDraft::new("planner", "coder", MessageKind::Delegation, 3)
            .content(serde_json::json!({"task": "write tests"}))
            .context("sprint 4");
        let record = draft.into_record(7, Utc::now());
        assert_eq!(record.seq, 7);
        assert_eq!(record.step, 3);
        assert_eq!(record.context_snapshot, "sprint 4");
        assert_eq!(record.content["task"], "write tests");
    }
}
