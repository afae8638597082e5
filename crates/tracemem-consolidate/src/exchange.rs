use std::collections::{BTreeMap, HashSet};

use tracemem_core::model::{CommunicationRecord, MessageKind};

/// A request or delegation together with the response that answered it.
#[derive(Debug, Clone)]
pub(crate) struct Exchange<'a> {
    pub opener: &'a CommunicationRecord,
    pub response: Option<&'a CommunicationRecord>,
    /// `error` records between the two agents while the exchange was open.
    pub errors: Vec<u64>,
    /// Exclusive upper bound of the exchange window, by sequence number.
    window_end: u64,
}

impl<'a> Exchange<'a> {
    pub fn initiator(&self) -> &'a str {
        &self.opener.from_agent
    }

    pub fn responder(&self) -> &'a str {
        &self.opener.to_agent
    }

    pub fn step_distance(&self) -> Option<u64> {
        self.response
            .map(|r| r.step.saturating_sub(self.opener.step))
    }

    /// Whether `seq` falls strictly inside the exchange.
    pub fn contains(&self, seq: u64) -> bool {
        seq > self.opener.seq && seq < self.window_end
    }

    pub fn evidence(&self) -> impl Iterator<Item = u64> + '_ {
        std::iter::once(self.opener.seq)
            .chain(self.response.map(|r| r.seq))
            .chain(self.errors.iter().copied())
    }
}

/// Unordered agent pair, smaller id first.
pub(crate) fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Pair every request/delegation with the earliest later, still unclaimed
/// response going the other way in the same or a later step. Openers are
/// visited in log order, so earlier requests claim earlier responses.
pub(crate) fn match_exchanges<'a>(records: &[&'a CommunicationRecord]) -> Vec<Exchange<'a>> {
    let mut responses: BTreeMap<(&str, &str), Vec<&'a CommunicationRecord>> = BTreeMap::new();
    let mut errors: BTreeMap<(&str, &str), Vec<u64>> = BTreeMap::new();
    for &r in records {
        match r.kind {
            MessageKind::Response => responses
                .entry((r.from_agent.as_str(), r.to_agent.as_str()))
                .or_default()
                .push(r),
            MessageKind::Error => errors
                .entry(pair_key(&r.from_agent, &r.to_agent))
                .or_default()
                .push(r.seq),
            _ => {}
        }
    }

    let openers: Vec<&'a CommunicationRecord> = records
        .iter()
        .copied()
        .filter(|r| r.kind.opens_exchange())
        .collect();

    let mut claimed: HashSet<u64> = HashSet::new();
    let mut exchanges = Vec::with_capacity(openers.len());
    for (i, &opener) in openers.iter().enumerate() {
        let response = responses
            .get(&(opener.to_agent.as_str(), opener.from_agent.as_str()))
            .and_then(|candidates| {
                candidates.iter().copied().find(|r| {
                    r.seq > opener.seq && r.step >= opener.step && !claimed.contains(&r.seq)
                })
            });
        if let Some(r) = response {
            claimed.insert(r.seq);
        }

        // An unanswered exchange stays open until the same initiator asks
        // the same responder again.
        let window_end = match response {
            Some(r) => r.seq,
            None => openers[i + 1..]
                .iter()
                .find(|o| o.from_agent == opener.from_agent && o.to_agent == opener.to_agent)
                .map_or(u64::MAX, |o| o.seq),
        };
        let in_window = errors
            .get(&pair_key(&opener.from_agent, &opener.to_agent))
            .map(|seqs| {
                seqs.iter()
                    .copied()
                    .filter(|&s| s > opener.seq && s < window_end)
                    .collect()
            })
            .unwrap_or_default();

        exchanges.push(Exchange {
            opener,
            response,
            errors: in_window,
            window_end,
        });
    }
    exchanges
}

/// Delegation chains as paths of exchange indices, each at least two
/// exchanges (three agents) long.
///
/// Exchange `b` continues exchange `a` when `a`'s responder opens `b`
/// while `a` is still waiting for its answer. Only maximal chains starting
/// at an exchange that is not itself a continuation are returned, and no
/// agent appears twice in one chain.
pub(crate) fn delegation_chains(exchanges: &[Exchange<'_>]) -> Vec<Vec<usize>> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); exchanges.len()];
    let mut nested = vec![false; exchanges.len()];
    for (a, outer) in exchanges.iter().enumerate() {
        for (b, inner) in exchanges.iter().enumerate().skip(a + 1) {
            if inner.initiator() == outer.responder()
                && inner.responder() != outer.initiator()
                && outer.contains(inner.opener.seq)
            {
                children[a].push(b);
                nested[b] = true;
            }
        }
    }

    let mut chains = Vec::new();
    for root in (0..exchanges.len()).filter(|&i| !nested[i] && !children[i].is_empty()) {
        let mut path = vec![root];
        let mut agents = vec![exchanges[root].initiator(), exchanges[root].responder()];
        extend_chain(exchanges, &children, &mut path, &mut agents, &mut chains);
    }
    chains
}

fn extend_chain<'a>(
    exchanges: &[Exchange<'a>],
    children: &[Vec<usize>],
    path: &mut Vec<usize>,
    agents: &mut Vec<&'a str>,
    chains: &mut Vec<Vec<usize>>,
) {
    let Some(&last) = path.last() else {
        return;
    };
    let mut extended = false;
    for &next in &children[last] {
        let responder = exchanges[next].responder();
        if agents.contains(&responder) {
            continue;
        }
        extended = true;
        path.push(next);
        agents.push(responder);
        extend_chain(exchanges, children, path, agents, chains);
        agents.pop();
        path.pop();
    }
    if !extended && path.len() >= 2 {
        chains.push(path.clone());
    }
}
