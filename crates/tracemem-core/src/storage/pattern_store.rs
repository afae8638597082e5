use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::layout::{read_json, write_json_atomic, Layout};
use super::retry::RetryPolicy;
use crate::error::CoreError;
use crate::model::{
    ConsolidationResult, Contribution, DecayPolicy, PatternEntry, PatternKey, SessionId,
};

const PATTERN_FILE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternFile {
    version: u32,
    entries: Vec<PatternEntry>,
}

/// Counts of what a merge did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub session_id: SessionId,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Entries that lost this session's contribution because re-analysis no
    /// longer produced their pattern.
    pub retracted: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.retracted == 0
    }
}

/// Process-wide cross-session pattern aggregates, stored in
/// `<root>/patterns/patterns.json`.
///
/// Each aggregate remembers the contribution of every session folded into
/// it, so merges are idempotent and commutative per session. Merges are
/// serialized in-process by a mutex and across processes by an fs2 lock.
pub struct PatternStore {
    layout: Layout,
    retry: RetryPolicy,
    merge_lock: Mutex<()>,
}

impl PatternStore {
    pub fn new(layout: Layout, retry: RetryPolicy) -> Result<Self, CoreError> {
        layout.ensure()?;
        Ok(Self {
            layout,
            retry,
            merge_lock: Mutex::new(()),
        })
    }

    /// Fold a consolidation result into the aggregates.
    pub fn merge(&self, result: &ConsolidationResult) -> Result<MergeReport, CoreError> {
        self.merge_at(result, Utc::now())
    }

    pub fn merge_at(
        &self,
        result: &ConsolidationResult,
        now: DateTime<Utc>,
    ) -> Result<MergeReport, CoreError> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _flock = self.acquire_file_lock()?;
        let mut entries = self.load_map()?;
        let session_id = &result.session_id;

        // Collapse the result into one contribution per key.
        let mut incoming: BTreeMap<PatternKey, Contribution> = BTreeMap::new();
        for pattern in &result.patterns {
            let key = PatternKey::new(pattern.participants.clone(), pattern.outcome);
            let slot = incoming.entry(key).or_insert(Contribution {
                occurrences: 0,
                mean_step_distance: None,
            });
            slot.mean_step_distance = merge_mean(
                slot.mean_step_distance,
                slot.occurrences,
                pattern.mean_step_distance,
                pattern.occurrences,
            );
            slot.occurrences += pattern.occurrences;
        }

        let mut report = MergeReport {
            session_id: session_id.clone(),
            ..Default::default()
        };

        for (key, contribution) in &incoming {
            let created = !entries.contains_key(key);
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| PatternEntry::new(key.clone(), now, session_id.clone()));
            if entry.sessions.get(session_id) == Some(contribution) {
                report.unchanged += 1;
                continue;
            }
            entry
                .sessions
                .insert(session_id.clone(), contribution.clone());
            entry.recount();
            entry.weight = 1.0;
            entry.last_updated_session = session_id.clone();
            entry.last_updated_at = now;
            if created {
                report.created += 1;
            } else {
                report.updated += 1;
            }
        }

        // A re-analysis that no longer yields a pattern supersedes the
        // session's earlier contribution to it.
        let incoming_keys: BTreeSet<&PatternKey> = incoming.keys().collect();
        for (key, entry) in entries.iter_mut() {
            if incoming_keys.contains(key) {
                continue;
            }
            if entry.sessions.remove(session_id).is_some() {
                entry.recount();
                report.retracted += 1;
            }
        }

        if !report.is_noop() {
            self.save_map(&entries)?;
        }
        tracing::info!(
            session_id = %session_id,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            retracted = report.retracted,
            "consolidation merged into pattern store"
        );
        Ok(report)
    }

    /// Entries involving `from -> to` (or all entries), highest frequency
    /// score first.
    pub fn query(&self, pair: Option<(&str, &str)>) -> Result<Vec<PatternEntry>, CoreError> {
        let mut entries: Vec<PatternEntry> = self
            .load_map()?
            .into_values()
            .filter(|e| match pair {
                Some((from, to)) => e.key.involves_pair(from, to),
                None => true,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then_with(|| b.count.cmp(&a.count))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    /// Down-weight entries that have not been updated for `policy.min_age_days`.
    /// History is kept; only ranking influence shrinks.
    pub fn decay(&self, policy: &DecayPolicy) -> Result<usize, CoreError> {
        self.decay_at(policy, Utc::now())
    }

    pub fn decay_at(&self, policy: &DecayPolicy, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _flock = self.acquire_file_lock()?;
        let mut entries = self.load_map()?;
        let min_age = Duration::days(policy.min_age_days);

        let mut decayed = 0;
        for entry in entries.values_mut() {
            if now - entry.last_updated_at < min_age {
                continue;
            }
            let next = (entry.weight * policy.factor).max(policy.floor);
            if next < entry.weight {
                entry.weight = next;
                decayed += 1;
            }
        }

        if decayed > 0 {
            self.save_map(&entries)?;
        }
        tracing::info!(decayed, factor = policy.factor, "pattern store decayed");
        Ok(decayed)
    }

    fn acquire_file_lock(&self) -> Result<File, CoreError> {
        let path = self.layout.patterns_lock_file();
        self.retry.run("lock pattern store", |_| {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            fs2::FileExt::try_lock_exclusive(&file)?;
            Ok(file)
        })
    }

    fn load_map(&self) -> Result<BTreeMap<PatternKey, PatternEntry>, CoreError> {
        let path = self.layout.patterns_file();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let file: PatternFile = read_json(&path)?;
        if file.version != PATTERN_FILE_VERSION {
            return Err(CoreError::Config(format!(
                "unsupported pattern store version {}",
                file.version
            )));
        }
        Ok(file
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect())
    }

    fn save_map(&self, entries: &BTreeMap<PatternKey, PatternEntry>) -> Result<(), CoreError> {
        let file = PatternFile {
            version: PATTERN_FILE_VERSION,
            entries: entries.values().cloned().collect(),
        };
        let path = self.layout.patterns_file();
        self.retry
            .run("write pattern store", |_| write_json_atomic(&path, &file))
    }
}

fn merge_mean(a: Option<f64>, a_n: u64, b: Option<f64>, b_n: u64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => {
            Some((a * a_n as f64 + b * b_n as f64) / (a_n + b_n) as f64)
        }
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
