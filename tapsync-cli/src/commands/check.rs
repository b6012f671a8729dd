//! `tapsync check`: report available updates; never writes formulas.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tapsync_sync::{BatchOptions, BatchReport, OutcomeStatus, Scope};

use super::{checked_updates, fail_on_errors, open_tap, write_json};

/// Arguments for `tapsync check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Check a single formula instead of the whole tap.
    #[arg(long)]
    pub formula: Option<String>,

    /// Also write the available updates to this JSON file.
    #[arg(long)]
    pub output_json: Option<PathBuf>,

    /// Print the full batch report as JSON instead of a table.
    #[arg(long)]
    pub json: bool,

    /// Leave resource pins out of the check.
    #[arg(long)]
    pub no_resources: bool,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "formula")]
    formula: String,
    #[tabled(rename = "current")]
    current: String,
    #[tabled(rename = "latest")]
    latest: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl CheckArgs {
    pub fn run(self, tap_root: &Path) -> Result<()> {
        let tap = open_tap(tap_root, self.no_resources)?;
        let scope = match self.formula.clone() {
            Some(name) => Scope::Recipe(name),
            None => Scope::All,
        };
        let options = BatchOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = tap.run(scope, options).context("check failed")?;

        if let Some(path) = &self.output_json {
            let updates = checked_updates(&tap, &report);
            write_json(path, &updates)?;
            eprintln!("Wrote {} update(s) to {}", updates.len(), path.display());
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report JSON")?
            );
        } else {
            print_table(&report);
        }

        fail_on_errors(&report)
    }
}

fn print_table(report: &BatchReport) {
    let summary = report.summary();
    println!(
        "tapsync v{} | {} formulas | {} updates | {} failed | checked {}",
        env!("CARGO_PKG_VERSION"),
        report.outcomes.len(),
        summary.would_update,
        summary.failed,
        report.checked_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
    );
    if report.outcomes.is_empty() {
        println!("No formulas found.");
        return;
    }

    let rows: Vec<CheckRow> = report.outcomes.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if summary.would_update > 0 {
        println!("Run 'tapsync update' to write the updates.");
    }
}

fn row(outcome: &tapsync_sync::PackageOutcome) -> CheckRow {
    let formula = outcome.package.0.clone();
    let dash = || "-".to_string();
    match &outcome.status {
        OutcomeStatus::WouldUpdate { candidate }
        | OutcomeStatus::Updated { candidate }
        | OutcomeStatus::Withheld { candidate } => CheckRow {
            formula,
            current: candidate.old_version.to_string(),
            latest: candidate.new_version.to_string(),
            status: "UPDATE".yellow().bold().to_string(),
            detail: if candidate.resources.is_empty() {
                candidate.upstream_name.clone()
            } else {
                format!(
                    "{} (+{} resources)",
                    candidate.upstream_name,
                    candidate.resources.len()
                )
            },
        },
        OutcomeStatus::NoUpdateNeeded { current } => CheckRow {
            formula,
            current: current.to_string(),
            latest: current.to_string(),
            status: "CURRENT".green().to_string(),
            detail: String::new(),
        },
        OutcomeStatus::Skipped => CheckRow {
            formula,
            current: dash(),
            latest: dash(),
            status: "SKIPPED".bright_black().to_string(),
            detail: "skip: true in tapsync.yaml".to_string(),
        },
        OutcomeStatus::Failed { kind, message } => CheckRow {
            formula,
            current: dash(),
            latest: dash(),
            status: "FAILED".red().bold().to_string(),
            detail: format!("{kind}: {message}"),
        },
    }
}
