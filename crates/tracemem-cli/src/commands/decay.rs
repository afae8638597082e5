use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::output::OutputFormat;

#[derive(Args)]
pub struct DecayArgs {
    /// Weight multiplier (default from config.toml)
    #[arg(long)]
    pub factor: Option<f64>,

    /// Only decay patterns not updated for this many days
    #[arg(long)]
    pub min_age_days: Option<i64>,

    /// Lowest weight a pattern can decay to
    #[arg(long)]
    pub floor: Option<f64>,
}

pub fn run(root: &Path, args: &DecayArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;

    let mut policy = memory.config().decay.clone();
    if let Some(factor) = args.factor {
        policy.factor = factor;
    }
    if let Some(days) = args.min_age_days {
        policy.min_age_days = days;
    }
    if let Some(floor) = args.floor {
        policy.floor = floor;
    }
    if !(policy.factor > 0.0 && policy.factor <= 1.0) {
        anyhow::bail!("--factor must be in (0, 1]");
    }

    let decayed = memory
        .decay_with(&policy)
        .context("Failed to decay pattern store")?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "decayed": decayed, "policy": policy })
        ),
        OutputFormat::Text => println!(
            "Decayed {decayed} pattern(s) (factor {}, older than {} days, floor {}).",
            policy.factor, policy.min_age_days, policy.floor
        ),
    }
    Ok(())
}
