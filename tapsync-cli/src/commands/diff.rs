//! `tapsync diff`: show unified diffs for what `update` would write.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use tapsync_sync::{BatchOptions, Scope};

use super::{fail_on_errors, open_tap};

/// Arguments for `tapsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Diff a single formula instead of the whole tap.
    #[arg(long)]
    pub formula: Option<String>,

    /// Leave resource pins out of the diff.
    #[arg(long)]
    pub no_resources: bool,
}

impl DiffArgs {
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
        let report = tap.run(scope, options).context("diff failed")?;
        let diffs = tap.diff(&report).context("failed to render diffs")?;

        if diffs.is_empty() {
            println!("No differences.");
        }
        for diff in diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }

        fail_on_errors(&report)
    }
}
