use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "tracemem",
    version,
    about = "Record, recover and consolidate multi-agent session traces"
)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Root directory holding sessions and patterns
    #[arg(long, global = true, env = "TRACEMEM_ROOT", default_value = ".tracemem")]
    root: PathBuf,

    #[command(subcommand)]
    command: commands::Commands,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = cli.root.as_path();
    match &cli.command {
        commands::Commands::Init(args) => commands::init::run(root, args),
        commands::Commands::Open(args) => commands::open::run(root, args, cli.format),
        commands::Commands::Record(args) => commands::record::run(root, args, cli.format),
        commands::Commands::Close(args) => commands::close::run(root, args, cli.format),
        commands::Commands::Abort(args) => commands::abort::run(root, args, cli.format),
        commands::Commands::Show(args) => commands::show::run(root, args, cli.format),
        commands::Commands::List(args) => commands::list::run(root, args, cli.format),
        commands::Commands::Recover(args) => commands::recover::run(root, args, cli.format),
        commands::Commands::Consolidate(args) => {
            commands::consolidate::run(root, args, cli.format)
        }
        commands::Commands::Patterns(args) => commands::patterns::run(root, args, cli.format),
        commands::Commands::Decay(args) => commands::decay::run(root, args, cli.format),
        commands::Commands::Purge(args) => commands::purge::run(root, args, cli.format),
        commands::Commands::Stats => commands::stats::run(root, cli.format),
    }
}
