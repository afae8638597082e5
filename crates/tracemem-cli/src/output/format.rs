use tracemem_sdk::{
    AbortReason, ConsolidationResult, ConsolidationState, PatternEntry, PurgeReport, Session,
    SessionHandle, SessionLog, SweepEntry, SweepOutcome,
};

use super::OutputFormat;

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

pub fn format_handle(handle: &SessionHandle, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(handle),
        OutputFormat::Text => format_handle_text(handle),
    }
}

fn format_handle_text(handle: &SessionHandle) -> String {
    let s = &handle.session;
    let mut out = String::new();

    out.push_str(&format!("Session: {}\n", s.id));
    out.push_str(&format!("Project: {}\n", s.project_id));
    if !s.goal.is_empty() {
        out.push_str(&format!("Goal:    {}\n", s.goal));
    }
    if !s.agents.is_empty() {
        out.push_str(&format!("Agents:  {}\n", s.agents.join(", ")));
    }
    out.push_str(&format!("Status:  {}\n", s.status));
    out.push_str(&format!(
        "Created: {}\n",
        s.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(ended) = s.ended_at {
        out.push_str(&format!(
            "Ended:   {}\n",
            ended.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out.push_str(&format!("Records: {}\n", handle.last_seq));

    match &s.abort {
        Some(AbortReason::Corruption { point }) => {
            out.push_str(&format!("Aborted: log corrupt at {point}\n"));
        }
        Some(AbortReason::Requested { reason }) => {
            out.push_str(&format!("Aborted: {reason}\n"));
        }
        None => {}
    }
    if s.status == tracemem_sdk::SessionStatus::Closed {
        let state = match &s.consolidation {
            ConsolidationState::Pending => "pending".to_string(),
            ConsolidationState::Completed { at, patterns } => format!(
                "completed {} ({patterns} patterns)",
                at.format("%Y-%m-%d %H:%M")
            ),
            ConsolidationState::Failed { reason, .. } => format!("failed: {reason}"),
        };
        out.push_str(&format!("Consolidation: {state}\n"));
    }
    out.trim_end().to_string()
}

pub fn format_session_list(sessions: &[Session], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(sessions),
        OutputFormat::Text => format_session_list_text(sessions),
    }
}

fn format_session_list_text(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions found.".to_string();
    }

    let mut out = String::new();
    for s in sessions {
        let goal = if s.goal.is_empty() { "(no goal)" } else { &s.goal };
        let time = s.created_at.format("%Y-%m-%d %H:%M");
        out.push_str(&format!(
            "\u{25c6} {} {:<7} {} [{}] {goal}  {time}\n",
            s.id,
            s.status.to_string(),
            s.project_id,
            s.agents.join(",")
        ));
    }
    out.trim_end().to_string()
}

pub fn format_records(log: &SessionLog, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(&serde_json::json!({
            "session_id": log.session.id,
            "records": log.records,
            "unreadable_tail": log.unreadable_tail,
        })),
        OutputFormat::Text => {
            let mut out = String::new();
            if log.records.is_empty() {
                out.push_str("No records.\n");
            }
            for r in &log.records {
                out.push_str(&format!(
                    "{:>5}  step {:<4} {:<12} {} -> {}  {}\n",
                    r.seq,
                    r.step,
                    r.kind.as_str(),
                    r.from_agent,
                    r.to_agent,
                    r.content
                ));
            }
            if let Some(point) = &log.unreadable_tail {
                out.push_str(&format!("!! log unreadable from {point}\n"));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_consolidation(result: &ConsolidationResult, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(result),
        OutputFormat::Text => format_consolidation_text(result),
    }
}

fn format_consolidation_text(result: &ConsolidationResult) -> String {
    let mut out = String::new();
    let stats = &result.stats;

    out.push_str(&format!(
        "\n--- Consolidation ({} records, handoff bound {} step(s)) ---\n",
        stats.total_records, result.handoff_step_bound
    ));
    let kinds: Vec<String> = stats
        .counts_by_kind
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(k, n)| format!("{k} {n}"))
        .collect();
    if !kinds.is_empty() {
        out.push_str(&format!("Kinds:     {}\n", kinds.join(", ")));
    }
    out.push_str(&format!(
        "Exchanges: {} matched, {} open-ended",
        stats.matched_exchanges,
        stats.open_ended.len()
    ));
    if let Some(mean) = stats.mean_round_trip_steps {
        out.push_str(&format!(", mean round trip {mean:.2} step(s)"));
    }
    out.push('\n');

    if result.patterns.is_empty() {
        out.push_str("No interaction patterns.\n");
    } else {
        out.push_str("\nPatterns:\n");
        for p in &result.patterns {
            out.push_str(&format!(
                "  {} {} x{}",
                p.participants.join("\u{2192}"),
                p.outcome,
                p.occurrences
            ));
            if let Some(d) = p.mean_step_distance {
                out.push_str(&format!("  (mean distance {d:.2})"));
            }
            out.push('\n');
        }
    }

    if !result.knowledge_gaps.is_empty() {
        out.push_str("\nKnowledge gaps:\n");
        for gap in &result.knowledge_gaps {
            out.push_str(&format!("  - {}\n", gap.note));
        }
    }

    if !result.unanalyzed.is_empty() {
        out.push_str(&format!(
            "\n{} portion(s) of the log could not be analyzed.\n",
            result.unanalyzed.len()
        ));
    }
    out.trim_end().to_string()
}

pub fn format_patterns(entries: &[PatternEntry], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(entries),
        OutputFormat::Text => {
            if entries.is_empty() {
                return "No patterns found.".to_string();
            }
            let mut out = String::new();
            for e in entries {
                out.push_str(&format!(
                    "{:>8.2}  {}  count {} in {} session(s), weight {:.2}, last {}\n",
                    e.score(),
                    e.name,
                    e.count,
                    e.sessions.len(),
                    e.weight,
                    e.last_updated_session
                ));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_sweep(entries: &[SweepEntry], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(entries),
        OutputFormat::Text => {
            if entries.is_empty() {
                return "No sessions needed recovery.".to_string();
            }
            let mut out = String::new();
            for e in entries {
                let line = match &e.outcome {
                    SweepOutcome::Recovered { report } if report.changed => format!(
                        "recovered through seq {}, discarded {} byte(s)",
                        report.last_seq, report.discarded_bytes
                    ),
                    SweepOutcome::Recovered { report } => {
                        format!("clean through seq {}", report.last_seq)
                    }
                    SweepOutcome::Aborted { point } => format!("ABORTED, corrupt at {point}"),
                    SweepOutcome::Consolidated { patterns, .. } => {
                        format!("consolidated, {patterns} pattern(s)")
                    }
                    SweepOutcome::Failed { error } => format!("failed: {error}"),
                };
                out.push_str(&format!("{}  {line}\n", e.session_id));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_purge(report: &PurgeReport, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => to_json(report),
        OutputFormat::Text => {
            if report.purged.is_empty() && report.failed.is_empty() {
                return "No sessions match the purge criteria.".to_string();
            }
            let verb = if report.dry_run { "Would purge" } else { "Purged" };
            let mut out = format!(
                "{verb} {} session(s), {} byte(s):\n",
                report.purged.len(),
                report.bytes_freed
            );
            for id in &report.purged {
                out.push_str(&format!("  {id}\n"));
            }
            for (id, reason) in &report.failed {
                out.push_str(&format!("  {id} FAILED: {reason}\n"));
            }
            out.trim_end().to_string()
        }
    }
}
