use std::collections::{BTreeMap, BTreeSet};

use tracemem_core::config::ConsolidationConfig;
use tracemem_core::model::{
    CommunicationRecord, ConsolidationResult, InteractionPattern, MessageKind, Outcome, PairStats,
    SessionLog, SessionStatus, SummaryStats, Unanalyzed,
};

use crate::error::ConsolidateError;
use crate::exchange::{delegation_chains, match_exchanges, pair_key, Exchange};
use crate::gaps::knowledge_gaps;

/// Turns a closed session log into a [`ConsolidationResult`].
#[derive(Debug, Clone)]
pub struct ConsolidationEngine {
    handoff_step_bound: u64,
}

#[derive(Default)]
struct PatternAcc {
    occurrences: u64,
    matched: u64,
    distance_sum: u64,
    evidence: BTreeSet<u64>,
}

#[derive(Default)]
struct PairAcc {
    exchanges: u64,
    matched: u64,
    distance_sum: u64,
}

impl ConsolidationEngine {
    pub fn new(handoff_step_bound: u64) -> Self {
        Self { handoff_step_bound }
    }

    pub fn from_config(config: &ConsolidationConfig) -> Self {
        Self::new(config.handoff_step_bound)
    }

    pub fn handoff_step_bound(&self) -> u64 {
        self.handoff_step_bound
    }

    /// Analyze a closed session.
    pub fn consolidate(&self, log: &SessionLog) -> Result<ConsolidationResult, ConsolidateError> {
        if log.session.status != SessionStatus::Closed {
            return Err(ConsolidateError::NotClosed {
                id: log.session.id.clone(),
                status: log.session.status,
            });
        }
        Ok(self.analyze(log))
    }

    /// Analyze a log regardless of its session status. Records that cannot
    /// take part in pairing are reported in `unanalyzed` instead of failing
    /// the whole pass.
    pub fn analyze(&self, log: &SessionLog) -> ConsolidationResult {
        let session_id = &log.session.id;
        let mut unanalyzed = Vec::new();
        let mut usable: Vec<&CommunicationRecord> = Vec::with_capacity(log.records.len());
        for record in &log.records {
            match unusable_reason(record) {
                Some(reason) => unanalyzed.push(Unanalyzed::Record {
                    seq: record.seq,
                    reason: reason.to_string(),
                }),
                None => usable.push(record),
            }
        }
        if let Some(point) = &log.unreadable_tail {
            unanalyzed.push(Unanalyzed::Tail {
                offset: point.offset,
                detail: point.detail.clone(),
            });
        }
        if !unanalyzed.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                portions = unanalyzed.len(),
                "consolidation skipped unanalyzable portions of the log"
            );
        }

        let exchanges = match_exchanges(&usable);
        let mut patterns: BTreeMap<(Vec<String>, Outcome), PatternAcc> = BTreeMap::new();
        let mut pairs: BTreeMap<(String, String), PairAcc> = BTreeMap::new();
        let mut open_ended = Vec::new();
        let mut matched_exchanges = 0u64;
        let mut round_trip_sum = 0u64;

        for ex in &exchanges {
            let outcome = self.classify(ex);
            let distance = ex.step_distance();
            let participants = vec![ex.initiator().to_string(), ex.responder().to_string()];

            let acc = patterns.entry((participants, outcome)).or_default();
            acc.occurrences += 1;
            acc.evidence.extend(ex.evidence());

            let pair = pairs
                .entry((ex.initiator().to_string(), ex.responder().to_string()))
                .or_default();
            pair.exchanges += 1;

            match distance {
                Some(d) => {
                    acc.matched += 1;
                    acc.distance_sum += d;
                    pair.matched += 1;
                    pair.distance_sum += d;
                    matched_exchanges += 1;
                    round_trip_sum += d;
                }
                None => open_ended.push(ex.opener.seq),
            }
        }

        for chain in delegation_chains(&exchanges) {
            let links: Vec<&Exchange<'_>> = chain.iter().map(|&i| &exchanges[i]).collect();
            let mut participants = vec![links[0].initiator().to_string()];
            participants.extend(links.iter().map(|ex| ex.responder().to_string()));
            let outcome = links
                .iter()
                .map(|ex| self.classify(ex))
                .max()
                .unwrap_or(Outcome::Unresolved);

            let acc = patterns.entry((participants, outcome)).or_default();
            acc.occurrences += 1;
            if let Some(d) = links[0].step_distance() {
                acc.matched += 1;
                acc.distance_sum += d;
            }
            for ex in &links {
                acc.evidence.extend(ex.evidence());
            }
        }

        let pairs = pair_stats(pairs, &usable);
        let knowledge_gaps = knowledge_gaps(&usable);

        let mut counts_by_kind: BTreeMap<MessageKind, u64> =
            MessageKind::ALL.iter().map(|&k| (k, 0)).collect();
        for record in &log.records {
            *counts_by_kind.entry(record.kind).or_insert(0) += 1;
        }

        let patterns: Vec<InteractionPattern> = patterns
            .into_iter()
            .map(|((participants, outcome), acc)| InteractionPattern {
                participants,
                outcome,
                occurrences: acc.occurrences,
                mean_step_distance: mean(acc.distance_sum, acc.matched),
                evidence: acc.evidence,
            })
            .collect();

        tracing::debug!(
            session_id = %session_id,
            records = log.records.len(),
            patterns = patterns.len(),
            gaps = knowledge_gaps.len(),
            "session consolidated"
        );

        ConsolidationResult {
            session_id: session_id.clone(),
            last_seq: log.last_seq(),
            handoff_step_bound: self.handoff_step_bound,
            patterns,
            pairs,
            knowledge_gaps,
            stats: SummaryStats {
                total_records: log.records.len() as u64,
                counts_by_kind,
                matched_exchanges,
                open_ended,
                mean_round_trip_steps: mean(round_trip_sum, matched_exchanges),
            },
            unanalyzed,
        }
    }

    fn classify(&self, ex: &Exchange<'_>) -> Outcome {
        match ex.step_distance() {
            None => Outcome::Unresolved,
            Some(d) if d > self.handoff_step_bound || !ex.errors.is_empty() => Outcome::Bottleneck,
            Some(_) => Outcome::SuccessfulHandoff,
        }
    }
}

fn unusable_reason(record: &CommunicationRecord) -> Option<&'static str> {
    if record.from_agent.trim().is_empty() || record.to_agent.trim().is_empty() {
        Some("empty agent id")
    } else if record.from_agent == record.to_agent {
        Some("self-addressed record")
    } else {
        None
    }
}

fn mean(sum: u64, n: u64) -> Option<f64> {
    (n > 0).then(|| sum as f64 / n as f64)
}

/// Per directed pair statistics. Errors are counted for the unordered pair,
/// and pairs that only ever exchanged errors still get an entry.
fn pair_stats(
    mut pairs: BTreeMap<(String, String), PairAcc>,
    records: &[&CommunicationRecord],
) -> Vec<PairStats> {
    let mut errors: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for r in records.iter().filter(|r| r.kind == MessageKind::Error) {
        *errors.entry(pair_key(&r.from_agent, &r.to_agent)).or_insert(0) += 1;
        let seen = pairs.contains_key(&(r.from_agent.clone(), r.to_agent.clone()))
            || pairs.contains_key(&(r.to_agent.clone(), r.from_agent.clone()));
        if !seen {
            pairs.insert((r.from_agent.clone(), r.to_agent.clone()), PairAcc::default());
        }
    }

    pairs
        .into_iter()
        .map(|((initiator, responder), acc)| {
            let errors = errors
                .get(&pair_key(&initiator, &responder))
                .copied()
                .unwrap_or(0);
            PairStats {
                mean_step_distance: mean(acc.distance_sum, acc.matched),
                initiator,
                responder,
                exchanges: acc.exchanges,
                matched: acc.matched,
                errors,
            }
        })
        .collect()
}
