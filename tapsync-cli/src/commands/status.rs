//! `tapsync status`: what every formula declares, without asking upstream.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tapsync_sync::status::{RecipeState, RecipeStatus};

use super::open_tap;

/// Arguments for `tapsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "formula")]
    formula: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "upstream")]
    upstream: String,
    #[tabled(rename = "resources")]
    resources: String,
    #[tabled(rename = "state")]
    state: String,
}

impl StatusArgs {
    pub fn run(self, tap_root: &Path) -> Result<()> {
        let tap = open_tap(tap_root, false)?;
        let rows = tap.status().context("failed to read formulas")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        let invalid = rows
            .iter()
            .filter(|r| matches!(r.state, RecipeState::Invalid { .. }))
            .count();
        println!(
            "tapsync v{} | {} | {} formulas | {} invalid",
            env!("CARGO_PKG_VERSION"),
            tap.formula_dir().display(),
            rows.len(),
            invalid
        );
        if rows.is_empty() {
            println!("No formulas found.");
            return Ok(());
        }

        let table_rows: Vec<StatusRow> = rows.into_iter().map(table_row).collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn table_row(row: RecipeStatus) -> StatusRow {
    match row.state {
        RecipeState::Ok {
            version,
            upstream,
            resources,
            explicit_version,
        } => StatusRow {
            formula: row.name,
            version: if explicit_version {
                format!("{version} (pinned)")
            } else {
                version
            },
            upstream,
            resources: resources.to_string(),
            state: "OK".green().to_string(),
        },
        RecipeState::Skipped { version } => StatusRow {
            formula: row.name,
            version,
            upstream: "-".to_string(),
            resources: "-".to_string(),
            state: "SKIPPED".bright_black().to_string(),
        },
        RecipeState::Invalid { error } => StatusRow {
            formula: row.name,
            version: "-".to_string(),
            upstream: "-".to_string(),
            resources: "-".to_string(),
            state: format!("{} {error}", "INVALID".red().bold()),
        },
    }
}
