use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::{format_consolidation, format_handle, format_records};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ShowArgs {
    /// Session id
    pub session: String,

    /// Show the recorded communication records
    #[arg(long)]
    pub records: bool,

    /// Show the stored consolidation result
    #[arg(long)]
    pub consolidation: bool,
}

pub fn run(root: &Path, args: &ShowArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let id = super::parse_session_id(&args.session)?;

    let output = if args.records {
        let log = memory
            .read_log(&id)
            .with_context(|| format!("Failed to read session '{id}'"))?;
        format_records(&log, format)
    } else if args.consolidation {
        match memory
            .consolidation(&id)
            .with_context(|| format!("Failed to read consolidation of '{id}'"))?
        {
            Some(result) => format_consolidation(&result, format),
            None => anyhow::bail!("Session '{id}' has not been consolidated"),
        }
    } else {
        let handle = memory
            .get(&id)
            .with_context(|| format!("Failed to read session '{id}'"))?;
        format_handle(&handle, format)
    };

    println!("{output}");
    Ok(())
}
