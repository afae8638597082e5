use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracemem_sdk::SessionStatus;

use crate::output::format::format_session_list;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ListArgs {
    /// Only sessions with this status (open, closed, aborted)
    #[arg(long)]
    pub status: Option<String>,

    /// Maximum number of entries
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

pub fn run(root: &Path, args: &ListArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let status = args.status.as_deref().map(parse_status).transpose()?;

    let sessions: Vec<_> = memory
        .list()
        .context("Failed to list sessions")?
        .into_iter()
        .filter(|s| status.map_or(true, |st| s.status == st))
        .take(args.limit)
        .collect();

    println!("{}", format_session_list(&sessions, format));
    Ok(())
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s.trim().to_ascii_lowercase().as_str() {
        "open" => Ok(SessionStatus::Open),
        "closed" => Ok(SessionStatus::Closed),
        "aborted" => Ok(SessionStatus::Aborted),
        other => anyhow::bail!("Unknown status '{other}'. Use open, closed or aborted."),
    }
}
