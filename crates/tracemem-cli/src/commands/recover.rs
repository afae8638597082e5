use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracemem_sdk::{CoreError, SweepEntry, SweepOutcome};

use crate::output::format::format_sweep;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct RecoverArgs {
    /// Recover only this session (default: every session left open)
    pub session: Option<String>,
}

pub fn run(root: &Path, args: &RecoverArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;

    let entries = match &args.session {
        Some(raw) => {
            let id = super::parse_session_id(raw)?;
            let outcome = match memory.store().recover(&id) {
                Ok(report) => SweepOutcome::Recovered { report },
                Err(CoreError::Corruption { point, .. }) => SweepOutcome::Aborted { point },
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to recover session '{id}'"))
                }
            };
            vec![SweepEntry {
                session_id: id,
                outcome,
            }]
        }
        None => memory
            .recover_open_sessions()
            .context("Recovery sweep failed")?,
    };

    println!("{}", format_sweep(&entries, format));
    Ok(())
}
