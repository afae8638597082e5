use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use tracemem_consolidate::{ConsolidateError, ConsolidationEngine};
use tracemem_core::error::{CoreError, CorruptionPoint};
use tracemem_core::model::{
    ConsolidationResult, ConsolidationState, DecayPolicy, MessageKind, PatternEntry, RecordDraft,
    Session, SessionHandle, SessionId, SessionLog, SessionStatus,
};
use tracemem_core::storage::{Layout, MergeReport, PatternStore, RecoveryReport, SessionStore};
use tracemem_core::{TraceMemoryConfig, TraceRecorder};

/// Result of closing a session.
///
/// The close itself has already succeeded when this is returned; a failed
/// consolidation is reported here and recorded on the session instead of
/// undoing the close.
#[derive(Debug)]
pub struct CloseOutcome {
    pub handle: SessionHandle,
    pub consolidation: Result<ConsolidationResult, ConsolidateError>,
    /// Set when the result was merged into the pattern store.
    pub merge: Option<MergeReport>,
}

/// What the startup sweep did with one session left `open`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Recovered { report: RecoveryReport },
    /// The log was unusable and the session is now `aborted`.
    Aborted { point: CorruptionPoint },
    /// A closed session whose consolidation never finished was consolidated.
    Consolidated { patterns: usize, merge: MergeReport },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepEntry {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub outcome: SweepOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub cutoff: Option<DateTime<Utc>>,
    pub purged: Vec<SessionId>,
    pub bytes_freed: u64,
    /// Sessions that matched but could not be removed, with the reason.
    pub failed: Vec<(SessionId, String)>,
}

/// Entry point for agent orchestration code: one handle over a tracemem root
/// directory.
///
/// `TraceMemory` is `Sync`; share it behind an `Arc` and record from as many
/// threads as needed.
pub struct TraceMemory {
    config: TraceMemoryConfig,
    store: Arc<SessionStore>,
    recorder: TraceRecorder,
    patterns: PatternStore,
    engine: ConsolidationEngine,
}

impl TraceMemory {
    /// Open a root directory, reading `config.toml` from it if present.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CoreError> {
        let root = root.as_ref();
        let config = TraceMemoryConfig::load(root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl AsRef<Path>, config: TraceMemoryConfig) -> Result<Self, CoreError> {
        let layout = Layout::new(root.as_ref());
        let store = Arc::new(SessionStore::new(layout.clone(), &config)?);
        let recorder = TraceRecorder::new(Arc::clone(&store));
        let patterns = PatternStore::new(layout, config.retry.clone())?;
        let engine = ConsolidationEngine::from_config(&config.consolidation);
        Ok(Self {
            config,
            store,
            recorder,
            patterns,
            engine,
        })
    }

    pub fn config(&self) -> &TraceMemoryConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.store.layout().root()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn pattern_store(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn open_session(
        &self,
        project_id: &str,
        goal: &str,
        agents: &[String],
    ) -> Result<SessionHandle, CoreError> {
        self.store.open(project_id, goal, agents)
    }

    /// Append one communication event; returns its sequence number once it
    /// is durable.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        session_id: &SessionId,
        from_agent: &str,
        to_agent: &str,
        kind: MessageKind,
        content: serde_json::Value,
        context_snapshot: &str,
        step: u64,
    ) -> Result<u64, CoreError> {
        self.recorder.record(
            session_id,
            from_agent,
            to_agent,
            kind,
            content,
            context_snapshot,
            step,
        )
    }

    pub fn record_draft(&self, session_id: &SessionId, draft: RecordDraft) -> Result<u64, CoreError> {
        Ok(self.recorder.record_draft(session_id, draft)?.seq)
    }

    /// Close the session, then consolidate it and fold the result into the
    /// pattern store before returning.
    pub fn close(&self, session_id: &SessionId) -> Result<CloseOutcome, CoreError> {
        let handle = self.store.close(session_id)?;
        let (consolidation, merge) = match self.consolidate_and_merge(session_id) {
            Ok((result, merge)) => (Ok(result), Some(merge)),
            Err(e) => (Err(e), None),
        };
        // Pick up the consolidation state written above.
        let handle = self.store.get(session_id).unwrap_or(handle);
        Ok(CloseOutcome {
            handle,
            consolidation,
            merge,
        })
    }

    pub fn abort(&self, session_id: &SessionId, reason: &str) -> Result<SessionHandle, CoreError> {
        self.store.abort(session_id, reason)
    }

    pub fn get(&self, session_id: &SessionId) -> Result<SessionHandle, CoreError> {
        self.store.get(session_id)
    }

    pub fn list(&self) -> Result<Vec<Session>, CoreError> {
        self.store.list()
    }

    pub fn list_open(&self) -> Result<Vec<SessionHandle>, CoreError> {
        self.store.list_open()
    }

    pub fn read_log(&self, session_id: &SessionId) -> Result<SessionLog, CoreError> {
        self.store.read_log(session_id)
    }

    /// Run recovery over every session still marked `open` that this process
    /// does not own, then finish consolidation of closed sessions a crash
    /// left `pending`. Call once at process start, before recording.
    /// A corrupt session is aborted; the others are unaffected.
    pub fn recover_open_sessions(&self) -> Result<Vec<SweepEntry>, CoreError> {
        let mut entries = Vec::new();
        for session in self.store.list()? {
            let session_id = session.id;
            let outcome = match (session.status, &session.consolidation) {
                (SessionStatus::Open, _) if !self.store.is_attached(&session_id) => {
                    match self.store.recover(&session_id) {
                        Ok(report) => SweepOutcome::Recovered { report },
                        Err(CoreError::Corruption { point, .. }) => SweepOutcome::Aborted { point },
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, "recovery sweep failed: {e}");
                            SweepOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
                (SessionStatus::Closed, ConsolidationState::Pending) => {
                    match self.consolidate_and_merge(&session_id) {
                        Ok((result, merge)) => SweepOutcome::Consolidated {
                            patterns: result.patterns.len(),
                            merge,
                        },
                        Err(e) => SweepOutcome::Failed {
                            error: e.to_string(),
                        },
                    }
                }
                _ => continue,
            };
            entries.push(SweepEntry {
                session_id,
                outcome,
            });
        }
        tracing::info!(sessions = entries.len(), "recovery sweep finished");
        Ok(entries)
    }

    /// Re-run consolidation for a closed session and merge again. With an
    /// unchanged log and policy the merge reports nothing changed.
    pub fn reconsolidate(
        &self,
        session_id: &SessionId,
    ) -> Result<(ConsolidationResult, MergeReport), ConsolidateError> {
        let session = self.store.get(session_id)?.session;
        if session.status != SessionStatus::Closed {
            return Err(ConsolidateError::NotClosed {
                id: session.id,
                status: session.status,
            });
        }
        self.consolidate_and_merge(session_id)
    }

    /// The latest stored consolidation result of a session.
    pub fn consolidation(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConsolidationResult>, CoreError> {
        self.store.load_consolidation(session_id)
    }

    /// Remove purge-eligible sessions that ended before `now - older_than`.
    /// Pattern history is never touched.
    pub fn purge(&self, older_than: Duration, dry_run: bool) -> Result<PurgeReport, CoreError> {
        let cutoff = Utc::now() - older_than;
        let mut report = PurgeReport {
            dry_run,
            cutoff: Some(cutoff),
            ..Default::default()
        };

        for session in self.store.list()? {
            let ended = session.ended_at.unwrap_or(session.created_at);
            if !session.is_purge_eligible() || ended >= cutoff {
                continue;
            }
            let bytes = dir_size(&self.store.layout().session_dir(&session.id));
            if !dry_run {
                if let Err(e) = self.store.purge(&session.id) {
                    tracing::warn!(session_id = %session.id, "purge failed: {e}");
                    report.failed.push((session.id, e.to_string()));
                    continue;
                }
            }
            report.bytes_freed += bytes;
            report.purged.push(session.id);
        }

        tracing::info!(
            purged = report.purged.len(),
            bytes_freed = report.bytes_freed,
            dry_run,
            "retention purge finished"
        );
        Ok(report)
    }

    /// [`purge`](Self::purge) with the configured retention period.
    pub fn purge_expired(&self, dry_run: bool) -> Result<PurgeReport, CoreError> {
        self.purge(Duration::days(self.config.retention.purge_after_days), dry_run)
    }

    pub fn patterns(&self, pair: Option<(&str, &str)>) -> Result<Vec<PatternEntry>, CoreError> {
        self.patterns.query(pair)
    }

    /// Apply the configured decay policy.
    pub fn decay(&self) -> Result<usize, CoreError> {
        self.patterns.decay(&self.config.decay)
    }

    pub fn decay_with(&self, policy: &DecayPolicy) -> Result<usize, CoreError> {
        self.patterns.decay(policy)
    }

    fn consolidate_and_merge(
        &self,
        session_id: &SessionId,
    ) -> Result<(ConsolidationResult, MergeReport), ConsolidateError> {
        match self.try_consolidate(session_id) {
            Ok(done) => Ok(done),
            Err(e) if e.is_retryable() => {
                // Left `pending` so the next sweep tries again; the raw log
                // must not become purge-eligible before it is merged.
                tracing::warn!(session_id = %session_id, "consolidation deferred: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "consolidation failed: {e}");
                let failed = ConsolidationState::Failed {
                    at: Utc::now(),
                    reason: e.to_string(),
                };
                if let Err(mark) = self.store.set_consolidation_state(session_id, failed) {
                    tracing::error!(
                        session_id = %session_id,
                        "could not record consolidation failure: {mark}"
                    );
                }
                Err(e)
            }
        }
    }

    fn try_consolidate(
        &self,
        session_id: &SessionId,
    ) -> Result<(ConsolidationResult, MergeReport), ConsolidateError> {
        let log = self.store.read_log(session_id)?;
        let result = self.engine.consolidate(&log)?;
        self.store.save_consolidation(session_id, &result)?;
        let merge = self.patterns.merge(&result)?;
        self.store.set_consolidation_state(
            session_id,
            ConsolidationState::Completed {
                at: Utc::now(),
                patterns: result.patterns.len(),
            },
        )?;
        tracing::info!(
            session_id = %session_id,
            patterns = result.patterns.len(),
            gaps = result.knowledge_gaps.len(),
            "session consolidated"
        );
        Ok((result, merge))
    }
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
