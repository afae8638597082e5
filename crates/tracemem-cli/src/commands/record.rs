use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracemem_sdk::{MessageKind, RecordDraft};

use crate::output::OutputFormat;

#[derive(Args)]
pub struct RecordArgs {
    /// Session id
    pub session: String,

    /// Sending agent
    #[arg(long)]
    pub from: String,

    /// Receiving agent
    #[arg(long)]
    pub to: String,

    /// request, response, notification, error or delegation
    #[arg(long)]
    pub kind: String,

    /// Execution step the message belongs to
    #[arg(long)]
    pub step: u64,

    /// Message payload; parsed as JSON, stored as a string otherwise
    #[arg(long)]
    pub content: Option<String>,

    /// Context snapshot to store with the record
    #[arg(long, default_value = "")]
    pub context: String,
}

pub fn run(root: &Path, args: &RecordArgs, format: OutputFormat) -> Result<()> {
    let memory = super::open_memory(root)?;
    let id = super::parse_session_id(&args.session)?;
    let kind: MessageKind = args.kind.parse().context("Invalid --kind")?;

    let content = args
        .content
        .as_deref()
        .map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        })
        .unwrap_or(serde_json::Value::Null);
    let draft = RecordDraft::new(&args.from, &args.to, kind, args.step)
        .content(content)
        .context(&args.context);

    let seq = memory
        .record_draft(&id, draft)
        .with_context(|| format!("Failed to record to session '{id}'"))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "session_id": id, "seq": seq })),
        OutputFormat::Text => println!("{seq}"),
    }
    Ok(())
}
