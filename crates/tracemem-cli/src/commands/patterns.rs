use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::format_patterns;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct PatternsArgs {
    /// Only patterns where this agent hands over to --to
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Receiving agent of the pair filter
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Maximum number of entries
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

pub fn run(root: &Path, args: &PatternsArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let pair = args.from.as_deref().zip(args.to.as_deref());
    let mut entries = memory
        .patterns(pair)
        .context("Failed to query pattern store")?;
    entries.truncate(args.limit);

    println!("{}", format_patterns(&entries, format));
    Ok(())
}
