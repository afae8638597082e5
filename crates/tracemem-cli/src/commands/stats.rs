use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracemem_sdk::{ConsolidationState, Outcome};

use crate::output::OutputFormat;

pub fn run(root: &Path, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let sessions = memory.list().context("Failed to list sessions")?;
    let patterns = memory
        .patterns(None)
        .context("Failed to query pattern store")?;

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_consolidation: BTreeMap<&str, usize> = BTreeMap::new();
    let mut purge_eligible = 0;
    let mut total_records: u64 = 0;
    for s in &sessions {
        *by_status.entry(s.status.to_string()).or_default() += 1;
        if s.status == tracemem_sdk::SessionStatus::Closed {
            let state = match s.consolidation {
                ConsolidationState::Pending => "pending",
                ConsolidationState::Completed { .. } => "completed",
                ConsolidationState::Failed { .. } => "failed",
            };
            *by_consolidation.entry(state).or_default() += 1;
        }
        if s.is_purge_eligible() {
            purge_eligible += 1;
        }
        match memory.get(&s.id) {
            Ok(handle) => total_records += handle.last_seq,
            Err(e) => tracing::warn!(session_id = %s.id, "Skipping unreadable session log: {e}"),
        }
    }

    let mut by_outcome: BTreeMap<Outcome, u64> = BTreeMap::new();
    for p in &patterns {
        *by_outcome.entry(p.key.outcome).or_default() += p.count;
    }

    match format {
        OutputFormat::Json => {
            let stats = serde_json::json!({
                "total_sessions": sessions.len(),
                "total_records": total_records,
                "by_status": by_status,
                "consolidation": by_consolidation,
                "purge_eligible": purge_eligible,
                "pattern_entries": patterns.len(),
                "observations_by_outcome": by_outcome
                    .iter()
                    .map(|(o, n)| (o.label(), n))
                    .collect::<BTreeMap<_, _>>(),
            });
            println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("tracemem Statistics");
            println!("===================");
            println!("Sessions:        {}", sessions.len());
            println!("Records:         {total_records}");
            println!("Purge-eligible:  {purge_eligible}");
            println!("Pattern entries: {}", patterns.len());
            println!();

            println!("By Status:");
            for (status, count) in &by_status {
                println!("  {status}: {count}");
            }
            if !by_consolidation.is_empty() {
                println!();
                println!("Consolidation (closed sessions):");
                for (state, count) in &by_consolidation {
                    println!("  {state}: {count}");
                }
            }
            if !by_outcome.is_empty() {
                println!();
                println!("Observations by Outcome:");
                for (outcome, count) in &by_outcome {
                    println!("  {outcome}: {count}");
                }
            }
        }
    }

    Ok(())
}
