use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::record::MessageKind;
use super::session::SessionId;

/// Qualitative outcome of one interaction between agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    SuccessfulHandoff,
    Bottleneck,
    Unresolved,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::SuccessfulHandoff => "successful handoff",
            Outcome::Bottleneck => "bottleneck",
            Outcome::Unresolved => "unresolved",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified interaction shape observed in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPattern {
    /// Initiator first. Two agents for a pair, more for a delegation chain.
    pub participants: Vec<String>,
    pub outcome: Outcome,
    pub occurrences: u64,
    /// Mean step distance between request and response over matched
    /// interactions. `None` when none of them were matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_step_distance: Option<f64>,
    /// Sequence numbers of the records supporting this pattern.
    pub evidence: BTreeSet<u64>,
}

impl InteractionPattern {
    pub fn is_chain(&self) -> bool {
        self.participants.len() > 2
    }
}

/// Per directed agent pair statistics (initiator -> responder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub initiator: String,
    pub responder: String,
    pub exchanges: u64,
    pub matched: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_step_distance: Option<f64>,
    /// `error` records exchanged between the two agents, either direction.
    pub errors: u64,
}

/// A step that ended in errors nobody recovered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub step: u64,
    /// The two agents involved, sorted.
    pub agents: Vec<String>,
    pub evidence: Vec<u64>,
    pub note: String,
}

/// A portion of the log consolidation could not use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unanalyzed {
    /// A readable record whose fields defeat pairing.
    Record { seq: u64, reason: String },
    /// Bytes past the last readable frame.
    Tail { offset: u64, detail: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_records: u64,
    /// Every kind is present, zero when unseen.
    pub counts_by_kind: BTreeMap<MessageKind, u64>,
    pub matched_exchanges: u64,
    /// Sequence numbers of requests/delegations that never got a response.
    pub open_ended: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_round_trip_steps: Option<f64>,
}

/// Derived, read-only result of analyzing one closed session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub session_id: SessionId,
    /// Highest sequence number the analysis covered.
    pub last_seq: u64,
    /// Short-distance bound the classification was computed with.
    pub handoff_step_bound: u64,
    pub patterns: Vec<InteractionPattern>,
    pub pairs: Vec<PairStats>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub stats: SummaryStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unanalyzed: Vec<Unanalyzed>,
}

impl ConsolidationResult {
    /// All sequence numbers referenced anywhere in the result.
    pub fn referenced_seqs(&self) -> BTreeSet<u64> {
        let mut seqs = BTreeSet::new();
        for p in &self.patterns {
            seqs.extend(p.evidence.iter().copied());
        }
        for g in &self.knowledge_gaps {
            seqs.extend(g.evidence.iter().copied());
        }
        seqs.extend(self.stats.open_ended.iter().copied());
        for u in &self.unanalyzed {
            if let Unanalyzed::Record { seq, .. } = u {
                seqs.insert(*seq);
            }
        }
        seqs
    }

    pub fn is_complete(&self) -> bool {
        self.unanalyzed.is_empty()
    }
}
