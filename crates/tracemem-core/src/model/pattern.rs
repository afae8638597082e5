use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::consolidation::Outcome;
use super::session::SessionId;

/// Aggregate key: the participating agents plus the outcome label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatternKey {
    pub participants: Vec<String>,
    pub outcome: Outcome,
}

impl PatternKey {
    pub fn new(participants: Vec<String>, outcome: Outcome) -> Self {
        Self {
            participants,
            outcome,
        }
    }

    /// Whether the participant list contains `from` directly followed by `to`.
    pub fn involves_pair(&self, from: &str, to: &str) -> bool {
        self.participants
            .windows(2)
            .any(|w| w[0] == from && w[1] == to)
    }
}

impl std::fmt::Display for PatternKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.participants.join("\u{2192}"), self.outcome)
    }
}

/// How much one session contributed to an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub occurrences: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_step_distance: Option<f64>,
}

/// A cross-session pattern aggregate.
///
/// Counts are derived from the per-session contribution map, so folding the
/// same session in again can only replace its own contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub key: PatternKey,
    pub name: String,
    pub sessions: BTreeMap<SessionId, Contribution>,
    pub count: u64,
    /// Down-weighting applied by decay, 1.0 for a freshly updated entry.
    pub weight: f64,
    pub last_updated_session: SessionId,
    pub last_updated_at: DateTime<Utc>,
}

impl PatternEntry {
    pub fn new(key: PatternKey, now: DateTime<Utc>, session: SessionId) -> Self {
        Self {
            name: key.to_string(),
            key,
            sessions: BTreeMap::new(),
            count: 0,
            weight: 1.0,
            last_updated_session: session,
            last_updated_at: now,
        }
    }

    /// Frequency score used for ranking.
    pub fn score(&self) -> f64 {
        self.count as f64 * self.weight
    }

    /// Occurrence-weighted mean step distance across contributing sessions.
    pub fn mean_step_distance(&self) -> Option<f64> {
        let (sum, n) = self
            .sessions
            .values()
            .filter_map(|c| c.mean_step_distance.map(|d| (d * c.occurrences as f64, c.occurrences)))
            .fold((0.0, 0u64), |(s, n), (d, o)| (s + d, n + o));
        (n > 0).then(|| sum / n as f64)
    }

    pub(crate) fn recount(&mut self) {
        self.count = self.sessions.values().map(|c| c.occurrences).sum();
    }
}

/// Down-weighting applied to entries that have not been updated recently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayPolicy {
    /// Multiplier applied per decay pass, in (0, 1].
    pub factor: f64,
    pub min_age_days: i64,
    /// Weight never drops below this.
    pub floor: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            factor: 0.5,
            min_age_days: 30,
            floor: 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = PatternKey::new(
            vec!["SystemAgent".into(), "VisionaryAgent".into()],
            Outcome::SuccessfulHandoff,
        );
        assert_eq!(key.to_string(), "SystemAgent\u{2192}VisionaryAgent successful handoff");
    }

    #[test]
    fn test_involves_pair() {
        let key = PatternKey::new(vec!["a".into(), "b".into(), "c".into()], Outcome::Bottleneck);
        assert!(key.involves_pair("a", "b"));
        assert!(key.involves_pair("b", "c"));
        assert!(!key.involves_pair("a", "c"));
        assert!(!key.involves_pair("b", "a"));
    }

    #[test]
    fn test_entry_mean_step_distance_is_weighted() {
        let key = PatternKey::new(vec!["a".into(), "b".into()], Outcome::Bottleneck);
        let mut entry = PatternEntry::new(key, Utc::now(), SessionId::parse("s1").unwrap());
        entry.sessions.insert(
            SessionId::parse("s1").unwrap(),
            Contribution {
                occurrences: 1,
                mean_step_distance: Some(2.0),
            },
        );
        entry.sessions.insert(
            SessionId::parse("s2").unwrap(),
            Contribution {
                occurrences: 3,
                mean_step_distance: Some(6.0),
            },
        );
        entry.recount();
        assert_eq!(entry.count, 4);
        assert_eq!(entry.mean_step_distance(), Some(5.0));
        assert_eq!(entry.score(), 4.0);
    }
}
