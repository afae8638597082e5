pub mod abort;
pub mod close;
pub mod consolidate;
pub mod decay;
pub mod init;
pub mod list;
pub mod open;
pub mod patterns;
pub mod purge;
pub mod record;
pub mod recover;
pub mod show;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracemem_core::storage::Layout;
use tracemem_sdk::{SessionId, TraceMemory};

#[derive(Subcommand)]
pub enum Commands {
    /// Create the tracemem root directory and a default config.toml
    Init(init::InitArgs),
    /// Open a new session and print its id
    Open(open::OpenArgs),
    /// Append one communication record to an open session
    Record(record::RecordArgs),
    /// Close a session and consolidate it
    Close(close::CloseArgs),
    /// Abort an open session
    Abort(abort::AbortArgs),
    /// Show a session, its records or its consolidation result
    Show(show::ShowArgs),
    /// List sessions (most recent first)
    List(list::ListArgs),
    /// Recover sessions left open by a crashed process
    Recover(recover::RecoverArgs),
    /// Re-run consolidation for a closed session
    Consolidate(consolidate::ConsolidateArgs),
    /// Query cross-session patterns
    Patterns(patterns::PatternsArgs),
    /// Down-weight patterns that have not been seen recently
    Decay(decay::DecayArgs),
    /// Remove raw logs of sessions past retention
    Purge(purge::PurgeArgs),
    /// Show aggregate statistics
    Stats,
}

/// Open an initialized root.
pub fn open_memory(root: &Path) -> Result<TraceMemory> {
    if !Layout::new(root).sessions_dir().is_dir() {
        anyhow::bail!(
            "tracemem is not initialized at {}. Run `tracemem init` first.",
            root.display()
        );
    }
    TraceMemory::open(root).with_context(|| format!("Failed to open {}", root.display()))
}

pub fn parse_session_id(raw: &str) -> Result<SessionId> {
    SessionId::parse(raw).with_context(|| format!("Invalid session id '{raw}'"))
}
