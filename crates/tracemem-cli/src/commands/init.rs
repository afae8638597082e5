use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracemem_core::config::CONFIG_FILE;
use tracemem_sdk::{TraceMemory, TraceMemoryConfig};

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing config.toml with defaults
    #[arg(long)]
    pub force: bool,
}

pub fn run(root: &Path, args: &InitArgs) -> Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create {}", root.display()))?;

    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        println!("tracemem is already initialized at {}.", root.display());
        println!("Use --force to reset config.toml to defaults.");
        return Ok(());
    }

    TraceMemoryConfig::default()
        .save(root)
        .context("Failed to write config.toml")?;
    // Creates the sessions/ and patterns/ directories.
    TraceMemory::open(root).context("Failed to initialize tracemem")?;

    println!("tracemem initialized at {}.", root.display());
    println!();
    println!("Next steps:");
    println!("  tracemem open --project <id> --agent <a> --agent <b>   Start a session");
    println!("  tracemem record <session> --from <a> --to <b> --kind request --step 1");
    println!("  tracemem close <session>                               Close and consolidate");
    Ok(())
}
