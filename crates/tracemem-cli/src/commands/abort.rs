use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::format::format_handle;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct AbortArgs {
    /// Session id
    pub session: String,

    /// Why the session is being given up on
    #[arg(long, default_value = "aborted by operator")]
    pub reason: String,
}

pub fn run(root: &Path, args: &AbortArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let id = super::parse_session_id(&args.session)?;
    let handle = memory
        .abort(&id, &args.reason)
        .with_context(|| format!("Failed to abort session '{id}'"))?;
    println!("{}", format_handle(&handle, format));
    Ok(())
}
