//! Trigger command object and its single handler.
//!
//! Every transport (CLI flags, CLI event file, daemon socket) builds a
//! [`TriggerEvent`] and hands it to [`handle`] / [`handle_async`].

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tapsync_core::RecipeStore;

use crate::error::{io_err, SyncError};
use crate::pipeline::{self, BatchOptions, BatchReport, PackageOutcome, Scope};
use crate::reconcile::Reconciler;

/// "Reconcile this package now", optionally to a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Refuse to write unless the new artifact hashes to this digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl TriggerEvent {
    pub fn new(package: impl Into<String>, version: Option<String>) -> Self {
        Self {
            package: package.into(),
            version,
            sha256: None,
        }
    }

    pub fn with_expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn from_json(payload: &str) -> Result<Self, SyncError> {
        let event: Self = serde_json::from_str(payload)?;
        Ok(event)
    }

    /// Read an event from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let payload = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_json(&payload)
    }

    fn options(&self, dry_run: bool) -> BatchOptions {
        BatchOptions {
            dry_run,
            target: self.version.clone(),
            expected_sha256: self.sha256.clone(),
        }
    }
}

fn single(report: BatchReport, package: &str) -> Result<PackageOutcome, SyncError> {
    report
        .outcomes
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::Worker {
            package: package.to_string(),
            message: "batch returned no outcome".to_string(),
        })
}

/// Reconcile exactly the named recipe and write the result unless `dry_run`.
pub async fn handle_async(
    event: &TriggerEvent,
    store: Arc<dyn RecipeStore>,
    reconciler: Arc<Reconciler>,
    dry_run: bool,
) -> Result<PackageOutcome, SyncError> {
    tracing::info!(
        "trigger: {} {}",
        event.package,
        event.version.as_deref().unwrap_or("(latest)")
    );
    let report = pipeline::run_async(
        store,
        reconciler,
        Scope::Recipe(event.package.clone()),
        event.options(dry_run),
    )
    .await?;
    single(report, &event.package)
}

/// Blocking form of [`handle_async`].
pub fn handle(
    event: &TriggerEvent,
    store: Arc<dyn RecipeStore>,
    reconciler: Arc<Reconciler>,
    dry_run: bool,
) -> Result<PackageOutcome, SyncError> {
    let report = pipeline::run(
        store,
        reconciler,
        Scope::Recipe(event.package.clone()),
        event.options(dry_run),
    )?;
    single(report, &event.package)
}
