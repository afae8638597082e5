use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Args;

use crate::output::format::format_purge;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct PurgeArgs {
    /// Purge sessions that ended longer ago than this (e.g. "14d", "2w");
    /// defaults to retention.purge_after_days
    #[arg(long)]
    pub older_than: Option<String>,

    /// Preview what would be purged without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation
    #[arg(long, short)]
    pub yes: bool,
}

pub fn run(root: &Path, args: &PurgeArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let older_than = match &args.older_than {
        Some(raw) => parse_duration(raw)?,
        None => Duration::days(memory.config().retention.purge_after_days),
    };

    // Without --yes only show what would go.
    let dry_run = args.dry_run || !args.yes;
    let report = memory
        .purge(older_than, dry_run)
        .context("Failed to purge sessions")?;

    println!("{}", format_purge(&report, format));
    if !args.dry_run && !args.yes && !report.purged.is_empty() {
        eprintln!("\nUse --yes to confirm deletion.");
    }
    Ok(())
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let split = s.char_indices().last().map_or(0, |(i, _)| i);
    let (num_str, unit) = s.split_at(split);
    let num: i64 = num_str
        .parse()
        .with_context(|| format!("Invalid duration number: {num_str}"))?;

    match unit {
        "h" => Ok(Duration::hours(num)),
        "d" => Ok(Duration::days(num)),
        "w" => Ok(Duration::weeks(num)),
        _ => anyhow::bail!("Unknown duration unit '{unit}'. Use h (hours), d (days), w (weeks)."),
    }
}
