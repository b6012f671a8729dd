//! `tapsync daemon`: foreground runtime plus socket client commands.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use tapsync_daemon::paths::socket_path;
use tapsync_daemon::{
    request_check, request_status, request_stop, request_trigger, start_blocking, DaemonError,
};
use tapsync_sync::TriggerEvent;

use super::open_tap;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the daemon to run a full batch now.
    Check(DaemonCheckArgs),
    /// Ask the daemon to reconcile one formula now.
    Trigger(DaemonTriggerArgs),
}

#[derive(Args, Debug)]
pub struct DaemonCheckArgs {
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct DaemonTriggerArgs {
    /// Formula to reconcile.
    pub package: String,

    #[arg(long)]
    pub version: Option<String>,

    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(command: DaemonCommand, tap_root: &Path) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            let root = tap_root
                .canonicalize()
                .with_context(|| format!("tap directory {} not found", tap_root.display()))?;
            let tap = open_tap(&root, false)?;
            start_blocking(&home, tap).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                print_json(&payload)?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Check(args) => {
            let data = request_check(&home, args.dry_run).context("daemon check failed")?;
            print_json(&data)?;
        }
        DaemonCommand::Trigger(args) => {
            let event = TriggerEvent::new(args.package, args.version);
            let data = request_trigger(&home, &event, args.dry_run)
                .with_context(|| format!("daemon trigger failed for '{}'", event.package))?;
            print_json(&data)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
