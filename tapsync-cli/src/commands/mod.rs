pub mod check;
pub mod daemon;
pub mod diff;
pub mod status;
pub mod trigger;
pub mod update;

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use tapsync_core::RecipeStore;
use tapsync_sync::{BatchReport, OutcomeStatus, PackageOutcome, Tap};

/// One available update, in the shape `check --output-json` writes and
/// `update --updates-file` reads back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedUpdate {
    pub formula: String,
    pub pypi_name: String,
    pub current_version: String,
    pub latest_version: String,
    pub tarball_url: String,
    pub sha256: String,
    pub file_path: String,
}

pub fn open_tap(root: &Path, no_resources: bool) -> Result<Tap> {
    let tap = Tap::open(root).with_context(|| format!("failed to open tap at {}", root.display()))?;
    Ok(if no_resources {
        tap.without_resources()
    } else {
        tap
    })
}

pub fn checked_updates(tap: &Tap, report: &BatchReport) -> Vec<CheckedUpdate> {
    report
        .candidates()
        .map(|candidate| CheckedUpdate {
            formula: candidate.package.0.clone(),
            pypi_name: candidate.upstream_name.clone(),
            current_version: candidate.old_version.to_string(),
            latest_version: candidate.new_version.to_string(),
            tarball_url: candidate.new_url.clone(),
            sha256: candidate.new_sha256.clone(),
            file_path: tap.store.location(&candidate.package),
        })
        .collect()
}

pub fn print_outcome(outcome: &PackageOutcome, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let name = &outcome.package;
    match &outcome.status {
        OutcomeStatus::Updated { candidate } | OutcomeStatus::WouldUpdate { candidate } => {
            println!(
                "{prefix}✎ '{name}' {} → {}",
                candidate.old_version,
                candidate.new_version.to_string().green()
            );
            for update in &candidate.resources {
                let old = update
                    .old_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "?".to_string());
                let new = update
                    .new_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "?".to_string());
                println!("    resource '{}' {old} → {new}", update.resource.name);
            }
        }
        OutcomeStatus::NoUpdateNeeded { current } => {
            println!("{prefix}· '{name}' up to date ({current})");
        }
        OutcomeStatus::Withheld { candidate } => println!(
            "{prefix}{} '{name}' {} → {} withheld: batch had failures",
            "!".yellow(),
            candidate.old_version,
            candidate.new_version
        ),
        OutcomeStatus::Skipped => println!("{prefix}- '{name}' skipped"),
        OutcomeStatus::Failed { kind, message } => {
            println!("{prefix}{} '{name}' [{kind}] {message}", "✗".red().bold());
        }
    }
}

pub fn fail_on_errors(report: &BatchReport) -> Result<()> {
    let failed = report.summary().failed;
    if failed > 0 {
        bail!("{failed} formula(s) failed");
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    payload.push('\n');
    std::fs::write(path, payload).with_context(|| format!("write {}", path.display()))
}
