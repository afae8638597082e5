use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::format_handle;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct OpenArgs {
    /// Originating project or task identifier
    #[arg(long)]
    pub project: String,

    /// What the session is meant to achieve
    #[arg(long, default_value = "")]
    pub goal: String,

    /// Participating agent (repeat for each agent, in order)
    #[arg(long = "agent")]
    pub agents: Vec<String>,
}

pub fn run(root: &Path, args: &OpenArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let handle = memory
        .open_session(&args.project, &args.goal, &args.agents)
        .context("Failed to open session")?;

    match format {
        OutputFormat::Json => println!("{}", format_handle(&handle, format)),
        OutputFormat::Text => println!("{}", handle.id()),
    }
    Ok(())
}
