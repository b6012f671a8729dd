//! `tapsync update`: reconcile formulas and write the results.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use tapsync_sync::{BatchOptions, OutcomeStatus, Scope, TriggerEvent};

use super::{fail_on_errors, open_tap, print_outcome, write_json, CheckedUpdate};

/// Arguments for `tapsync update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Update a single formula instead of the whole tap.
    #[arg(long)]
    pub formula: Option<String>,

    /// Target version for `--formula`; used verbatim.
    #[arg(long, requires = "formula")]
    pub version: Option<String>,

    /// Apply the updates listed in a `check --output-json` file.
    #[arg(long, conflicts_with = "formula")]
    pub updates_file: Option<PathBuf>,

    /// Show what would be written without writing any files.
    #[arg(long)]
    pub dry_run: bool,

    /// Leave resource pins untouched.
    #[arg(long)]
    pub no_resources: bool,

    /// Write the outcomes as JSON to this file.
    #[arg(long)]
    pub output_json: Option<PathBuf>,
}

impl UpdateArgs {
    pub fn run(self, tap_root: &Path) -> Result<()> {
        let tap = open_tap(tap_root, self.no_resources)?;

        if let Some(file) = &self.updates_file {
            let planned = read_updates_file(file)?;
            if planned.is_empty() {
                println!("No updates to process");
                return Ok(());
            }

            let mut outcomes = Vec::new();
            let mut failed = 0usize;
            for entry in planned {
                let event = TriggerEvent::new(entry.formula, Some(entry.latest_version))
                    .with_expected_sha256(entry.sha256);
                match tap.trigger(&event, self.dry_run) {
                    Ok(outcome) => {
                        print_outcome(&outcome, self.dry_run);
                        if matches!(outcome.status, OutcomeStatus::Failed { .. }) {
                            failed += 1;
                        }
                        outcomes.push(outcome);
                    }
                    Err(err) => {
                        eprintln!("✗ '{}': {err}", event.package);
                        failed += 1;
                    }
                }
            }
            if let Some(path) = &self.output_json {
                write_json(path, &outcomes)?;
            }
            if failed > 0 {
                bail!("{failed} formula(s) failed");
            }
            return Ok(());
        }

        let scope = match self.formula.clone() {
            Some(name) => Scope::Recipe(name),
            None => Scope::All,
        };
        let options = BatchOptions {
            dry_run: self.dry_run,
            target: self.version.clone(),
            ..Default::default()
        };
        let report = tap.run(scope, options).context("update failed")?;

        for outcome in &report.outcomes {
            print_outcome(outcome, self.dry_run);
        }
        let summary = report.summary();
        println!(
            "{} updated, {} up to date, {} withheld, {} failed",
            summary.updated + summary.would_update,
            summary.up_to_date,
            summary.withheld,
            summary.failed
        );
        if let Some(path) = &self.output_json {
            write_json(path, &report)?;
        }

        fail_on_errors(&report)
    }
}

fn read_updates_file(path: &Path) -> Result<Vec<CheckedUpdate>> {
    let payload = std::fs::read_to_string(path)
        .with_context(|| format!("updates file '{}' not found", path.display()))?;
    serde_json::from_str(&payload)
        .with_context(|| format!("updates file '{}' is not a list of updates", path.display()))
}
