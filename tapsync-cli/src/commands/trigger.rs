//! `tapsync trigger`: reconcile one formula now, from flags or an event file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use tapsync_sync::{OutcomeStatus, TriggerEvent};

use super::{open_tap, print_outcome};

/// Arguments for `tapsync trigger`.
#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Formula to reconcile.
    #[arg(long, required_unless_present = "event", conflicts_with = "event")]
    pub package: Option<String>,

    /// Target version; latest stable upstream when omitted.
    #[arg(long, requires = "package")]
    pub version: Option<String>,

    /// JSON file holding `{"package": ..., "version": ...}`.
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// Compute the update without writing it.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

impl TriggerArgs {
    pub fn run(self, tap_root: &Path) -> Result<()> {
        let event = match (&self.event, &self.package) {
            (Some(path), _) => TriggerEvent::load(path)
                .with_context(|| format!("failed to read trigger event {}", path.display()))?,
            (None, Some(package)) => TriggerEvent::new(package.clone(), self.version.clone()),
            (None, None) => bail!("provide --package or --event"),
        };

        let tap = open_tap(tap_root, false)?;
        let outcome = tap
            .trigger(&event, self.dry_run)
            .with_context(|| format!("trigger failed for '{}'", event.package))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to serialize outcome")?
            );
        } else {
            print_outcome(&outcome, self.dry_run);
        }

        if let OutcomeStatus::Failed { kind, .. } = &outcome.status {
            bail!("'{}' failed: {kind}", event.package);
        }
        Ok(())
    }
}
