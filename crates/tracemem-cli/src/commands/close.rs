use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::{format_consolidation, format_handle};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct CloseArgs {
    /// Session id
    pub session: String,
}

pub fn run(root: &Path, args: &CloseArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let id = super::parse_session_id(&args.session)?;
    let outcome = memory
        .close(&id)
        .with_context(|| format!("Failed to close session '{id}'"))?;

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "session": outcome.handle,
                "consolidation": outcome.consolidation.as_ref().ok(),
                "consolidation_error": outcome.consolidation.as_ref().err().map(|e| e.to_string()),
                "merge": outcome.merge,
            });
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{}", format_handle(&outcome.handle, format));
            match &outcome.consolidation {
                Ok(result) => println!("{}", format_consolidation(result, format)),
                Err(e) => eprintln!("Consolidation failed (session stays closed): {e}"),
            }
        }
    }
    Ok(())
}
