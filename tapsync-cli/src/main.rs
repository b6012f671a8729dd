//! tapsync: keep a Homebrew tap's Python formulas in step with PyPI.
//!
//! # Usage
//!
//! ```text
//! tapsync check   [--formula <name>] [--output-json <file>] [--json]
//! tapsync update  [--formula <name> [--version <v>]] [--updates-file <file>] [--dry-run] [--no-resources]
//! tapsync diff    [--formula <name>]
//! tapsync status  [--json]
//! tapsync trigger --package <name> [--version <v>] | --event <file.json> [--dry-run]
//! tapsync daemon  start|stop|status|check|trigger
//! ```
//!
//! Every command takes `--tap <dir>` (default: current directory) and `-v`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, daemon::DaemonCommand, diff::DiffArgs, status::StatusArgs,
    trigger::TriggerArgs, update::UpdateArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tapsync",
    version,
    about = "Reconcile Homebrew formulas with their upstream PyPI releases",
    long_about = None,
)]
struct Cli {
    /// Tap root holding `tapsync.yaml` and the formula directory.
    #[arg(long, global = true, default_value = ".")]
    tap: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report available updates without writing anything.
    Check(CheckArgs),

    /// Reconcile formulas and write the updates.
    Update(UpdateArgs),

    /// Show unified diffs of what `update` would write.
    Diff(DiffArgs),

    /// List formulas with their declared version and upstream package (offline).
    Status(StatusArgs),

    /// Reconcile a single formula now.
    Trigger(TriggerArgs),

    /// Run or talk to the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check(args) => args.run(&cli.tap),
        Commands::Update(args) => args.run(&cli.tap),
        Commands::Diff(args) => args.run(&cli.tap),
        Commands::Status(args) => args.run(&cli.tap),
        Commands::Trigger(args) => args.run(&cli.tap),
        Commands::Daemon { command } => commands::daemon::run(command, &cli.tap),
    }
}
