use std::collections::BTreeMap;

use tracemem_core::model::{CommunicationRecord, KnowledgeGap, MessageKind};

use crate::exchange::pair_key;

/// Steps made up solely of `error` records, per agent pair, where the pair
/// never exchanged a non-error record afterwards.
pub(crate) fn knowledge_gaps(records: &[&CommunicationRecord]) -> Vec<KnowledgeGap> {
    let mut by_step: BTreeMap<u64, Vec<&CommunicationRecord>> = BTreeMap::new();
    for &r in records {
        by_step.entry(r.step).or_default().push(r);
    }

    let mut gaps = Vec::new();
    for (step, in_step) in by_step {
        if !in_step.iter().all(|r| r.kind == MessageKind::Error) {
            continue;
        }

        let mut by_pair: BTreeMap<(&str, &str), Vec<u64>> = BTreeMap::new();
        for r in in_step {
            by_pair
                .entry(pair_key(&r.from_agent, &r.to_agent))
                .or_default()
                .push(r.seq);
        }

        for ((a, b), evidence) in by_pair {
            let last = evidence.iter().copied().max().unwrap_or(0);
            let recovered = records.iter().any(|r| {
                r.seq > last && r.kind != MessageKind::Error && pair_key(&r.from_agent, &r.to_agent) == (a, b)
            });
            if recovered {
                continue;
            }
            let note = format!(
                "step {step}: {} error record(s) between {a} and {b} with no later recovery",
                evidence.len()
            );
            gaps.push(KnowledgeGap {
                step,
                agents: vec![a.to_string(), b.to_string()],
                evidence,
                note,
            });
        }
    }
    gaps
}
