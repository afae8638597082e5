use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::format_consolidation;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ConsolidateArgs {
    /// Session id
    pub session: String,
}

pub fn run(root: &Path, args: &ConsolidateArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let id = super::parse_session_id(&args.session)?;
    let (result, merge) = memory
        .reconsolidate(&id)
        .with_context(|| format!("Failed to consolidate session '{id}'"))?;

    println!("{}", format_consolidation(&result, format));
    if matches!(format, OutputFormat::Text) {
        if merge.is_noop() {
            println!("Pattern store unchanged.");
        } else {
            println!(
                "Pattern store: {} created, {} updated, {} retracted.",
                merge.created, merge.updated, merge.retracted
            );
        }
    }
    Ok(())
}
