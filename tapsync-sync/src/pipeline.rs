//! Shared batch pipeline entrypoint used by CLI, trigger handler and daemon.
//!
//! ## Batch flow
//!
//! 1. Load every recipe in scope; load failures become `Failed` outcomes.
//! 2. Reconcile each package on a blocking worker, at most `jobs` at a time,
//!    each bounded by `package_timeout`.
//! 3. Collect results in recipe order on the calling task.
//! 4. Write: per package, or all-or-nothing in aggregate mode.
//!
//! A timed-out worker's late result is dropped; only step 4 writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use tapsync_core::{
    BatchMode, RecipeName, RecipeStore, StoreError, StoredRecipe, UpdateCandidate, Version,
};

use crate::error::{ErrorKind, ReconcileError, SyncError};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::writer;

/// Scope for a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every recipe in the store, minus those marked `skip`.
    All,
    /// A single named recipe; `skip` does not apply.
    Recipe(String),
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Compute candidates but write nothing.
    pub dry_run: bool,
    /// Explicit target version; only honoured with [`Scope::Recipe`].
    pub target: Option<String>,
    /// Digest the new artifact must have, as recorded by an earlier check.
    /// Only honoured with [`Scope::Recipe`].
    pub expected_sha256: Option<String>,
}

/// Per-package result of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Updated { candidate: UpdateCandidate },
    WouldUpdate { candidate: UpdateCandidate },
    NoUpdateNeeded { current: Version },
    /// Reconciled, but not written because an aggregate batch had failures.
    Withheld { candidate: UpdateCandidate },
    Skipped,
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOutcome {
    pub package: RecipeName,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl PackageOutcome {
    fn failed(package: RecipeName, err: &SyncError) -> Self {
        let kind = err.kind();
        tracing::warn!("{package}: {kind}: {err}");
        Self {
            package,
            status: OutcomeStatus::Failed {
                kind,
                message: err.to_string(),
            },
        }
    }

    /// The computed update, whether or not it was written.
    pub fn candidate(&self) -> Option<&UpdateCandidate> {
        match &self.status {
            OutcomeStatus::Updated { candidate }
            | OutcomeStatus::WouldUpdate { candidate }
            | OutcomeStatus::Withheld { candidate } => Some(candidate),
            _ => None,
        }
    }
}

/// Counters over a [`BatchReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub updated: usize,
    pub would_update: usize,
    pub up_to_date: usize,
    pub withheld: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub checked_at: DateTime<Utc>,
    pub mode: BatchMode,
    pub dry_run: bool,
    pub outcomes: Vec<PackageOutcome>,
}

impl BatchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a PackageOutcome>) -> Self {
        let mut s = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Updated { .. } => s.updated += 1,
                OutcomeStatus::WouldUpdate { .. } => s.would_update += 1,
                OutcomeStatus::NoUpdateNeeded { .. } => s.up_to_date += 1,
                OutcomeStatus::Withheld { .. } => s.withheld += 1,
                OutcomeStatus::Skipped => s.skipped += 1,
                OutcomeStatus::Failed { .. } => s.failed += 1,
            }
        }
        s
    }
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_outcomes(&self.outcomes)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
    }

    pub fn candidates(&self) -> impl Iterator<Item = &UpdateCandidate> {
        self.outcomes.iter().filter_map(PackageOutcome::candidate)
    }

    pub fn outcome(&self, package: &str) -> Option<&PackageOutcome> {
        self.outcomes.iter().find(|o| o.package.0 == package)
    }
}

fn check_expected_digest(
    candidate: &UpdateCandidate,
    expected: Option<&str>,
) -> Result<(), ReconcileError> {
    match expected {
        Some(expected) if !expected.eq_ignore_ascii_case(&candidate.new_sha256) => {
            Err(ReconcileError::HashComputation {
                url: candidate.new_url.clone(),
                message: format!(
                    "checksum mismatch: expected {expected}, got {}",
                    candidate.new_sha256
                ),
            })
        }
        _ => Ok(()),
    }
}

enum Slot {
    Done(PackageOutcome),
    Pending(StoredRecipe, tokio::task::JoinHandle<Result<Reconciliation, SyncError>>),
}

/// Run the batch pipeline on the current tokio runtime.
pub async fn run_async(
    store: Arc<dyn RecipeStore>,
    reconciler: Arc<Reconciler>,
    scope: Scope,
    options: BatchOptions,
) -> Result<BatchReport, SyncError> {
    let checked_at = Utc::now();
    let config = reconciler.config().clone();
    let names = match &scope {
        Scope::All => store.names()?,
        Scope::Recipe(name) => {
            let name = RecipeName::from(name.as_str());
            if !store.names()?.contains(&name) {
                return Err(SyncError::Store(StoreError::NotFound {
                    location: store.location(&name),
                    name: name.0,
                }));
            }
            vec![name]
        }
    };
    let (target, expected_sha256) = match &scope {
        Scope::Recipe(_) => (options.target.clone(), options.expected_sha256.clone()),
        Scope::All => (None, None),
    };
    tracing::info!("checking {} recipe(s)", names.len());

    let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));
    let timeout = config.package_timeout();
    let mut slots = Vec::with_capacity(names.len());

    for name in names {
        if matches!(scope, Scope::All) && config.settings(&name).skip {
            tracing::debug!("{name}: skipped by config");
            slots.push(Slot::Done(PackageOutcome {
                package: name,
                status: OutcomeStatus::Skipped,
            }));
            continue;
        }
        let stored = match store.load(&name) {
            Ok(stored) => stored,
            Err(err) => {
                slots.push(Slot::Done(PackageOutcome::failed(name, &err.into())));
                continue;
            }
        };

        let semaphore = Arc::clone(&semaphore);
        let reconciler = Arc::clone(&reconciler);
        let recipe = stored.recipe.clone();
        let target = target.clone();
        let package = name.0.clone();
        let handle = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await.map_err(|e| SyncError::Worker {
                package: package.clone(),
                message: e.to_string(),
            })?;
            // The permit lives as long as the blocking call, which keeps
            // running after a timeout.
            let work = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                reconciler.reconcile(&recipe, target.as_deref())
            });
            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(result)) => result.map_err(SyncError::from),
                Ok(Err(join)) => Err(SyncError::Worker {
                    package,
                    message: join.to_string(),
                }),
                Err(_) => Err(SyncError::Timeout {
                    package,
                    after: timeout,
                }),
            }
        });
        slots.push(Slot::Pending(stored, handle));
    }

    // Collect in recipe order.
    let mut collected: Vec<(PackageOutcome, Option<StoredRecipe>)> = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Slot::Done(outcome) => collected.push((outcome, None)),
            Slot::Pending(stored, handle) => {
                let package = stored.recipe.name.clone();
                let result = handle.await.unwrap_or_else(|join| {
                    Err(SyncError::Worker {
                        package: package.0.clone(),
                        message: join.to_string(),
                    })
                });
                let outcome = match result {
                    Ok(Reconciliation::NoUpdateNeeded { current }) => PackageOutcome {
                        package,
                        status: OutcomeStatus::NoUpdateNeeded { current },
                    },
                    Ok(Reconciliation::Update(candidate)) => {
                        match check_expected_digest(&candidate, expected_sha256.as_deref()) {
                            Ok(()) => PackageOutcome {
                                package,
                                status: OutcomeStatus::WouldUpdate { candidate },
                            },
                            Err(err) => PackageOutcome::failed(package, &err.into()),
                        }
                    }
                    Err(err) => PackageOutcome::failed(package, &err),
                };
                collected.push((outcome, Some(stored)));
            }
        }
    }

    let outcomes = commit(store.as_ref(), collected, config.batch_mode, options.dry_run);
    let report = BatchReport {
        checked_at,
        mode: config.batch_mode,
        dry_run: options.dry_run,
        outcomes,
    };
    let s = report.summary();
    tracing::info!(
        "batch done: {} updated, {} would update, {} current, {} withheld, {} skipped, {} failed",
        s.updated,
        s.would_update,
        s.up_to_date,
        s.withheld,
        s.skipped,
        s.failed
    );
    Ok(report)
}

/// Step 4: turn `WouldUpdate` outcomes into writes according to the mode.
fn commit(
    store: &dyn RecipeStore,
    collected: Vec<(PackageOutcome, Option<StoredRecipe>)>,
    mode: BatchMode,
    dry_run: bool,
) -> Vec<PackageOutcome> {
    if dry_run {
        return collected.into_iter().map(|(o, _)| o).collect();
    }

    // Aggregate: render everything first so a write-side failure also
    // withholds the rest.
    let mut rendered: Vec<(PackageOutcome, Option<String>)> = Vec::new();
    for (outcome, stored) in collected {
        match (outcome.status, stored) {
            (OutcomeStatus::WouldUpdate { candidate }, Some(stored)) => {
                match writer::render_update(&stored, &candidate) {
                    Ok(text) => rendered.push((
                        PackageOutcome {
                            package: outcome.package,
                            status: OutcomeStatus::WouldUpdate { candidate },
                        },
                        Some(text),
                    )),
                    Err(err) => rendered.push((PackageOutcome::failed(outcome.package, &err), None)),
                }
            }
            (status, _) => rendered.push((
                PackageOutcome {
                    package: outcome.package,
                    status,
                },
                None,
            )),
        }
    }

    let blocked = mode == BatchMode::Aggregate
        && rendered
            .iter()
            .any(|(o, _)| matches!(o.status, OutcomeStatus::Failed { .. }));
    if blocked {
        tracing::warn!("aggregate batch has failures; withholding all updates");
    }

    rendered
        .into_iter()
        .map(|(outcome, write)| {
            let (package, candidate) = match outcome.status {
                OutcomeStatus::WouldUpdate { candidate } => (outcome.package, candidate),
                status => {
                    return PackageOutcome {
                        package: outcome.package,
                        status,
                    }
                }
            };
            if blocked {
                return PackageOutcome {
                    package,
                    status: OutcomeStatus::Withheld { candidate },
                };
            }
            let Some(text) = write else {
                return PackageOutcome {
                    package,
                    status: OutcomeStatus::WouldUpdate { candidate },
                };
            };
            match store.put(&package, &text) {
                Ok(()) => {
                    tracing::info!("wrote: {}", store.location(&package));
                    PackageOutcome {
                        package,
                        status: OutcomeStatus::Updated { candidate },
                    }
                }
                Err(err) => PackageOutcome::failed(package, &err.into()),
            }
        })
        .collect()
}

/// Blocking entrypoint: run the pipeline on a private multi-thread runtime.
///
/// Workers still running after their timeout are abandoned on return.
pub fn run(
    store: Arc<dyn RecipeStore>,
    reconciler: Arc<Reconciler>,
    scope: Scope,
    options: BatchOptions,
) -> Result<BatchReport, SyncError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SyncError::Runtime)?;
    let report = runtime.block_on(run_async(store, reconciler, scope, options));
    runtime.shutdown_background();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::upstream::StaticIndex;
    use tapsync_core::{MemoryRecipeStore, TapConfig};

    const SHA: &str = "ad6d1a2c3b4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8";

    fn tiny(stem: &str, version: &str) -> String {
        format!(
            "class Tiny < Formula\n  url \"https://h/{stem}-{version}.tar.gz\"\n  sha256 \"{SHA}\"\nend\n"
        )
    }

    fn setup(config: TapConfig) -> (Arc<MemoryRecipeStore>, Arc<Reconciler>) {
        let store = Arc::new(MemoryRecipeStore::with_recipes([
            ("alpha", tiny("alpha", "1.0")),
            ("beta", tiny("beta", "2.0")),
        ]));
        let index = StaticIndex::new()
            .with_release("alpha", "1.1", None)
            .with_release("beta", "2.0", None);
        let fetcher = StaticFetcher::new().with_body("https://h/alpha-1.1.tar.gz", "alpha 1.1");
        let reconciler = Reconciler::new(Arc::new(index), Arc::new(fetcher)).with_config(Arc::new(config));
        (store, Arc::new(reconciler))
    }

    #[test]
    fn blocking_run_updates_and_reports_in_order() {
        let (store, reconciler) = setup(TapConfig::default());
        let report = run(store.clone(), reconciler, Scope::All, BatchOptions::default()).expect("run");

        let packages: Vec<&str> = report.outcomes.iter().map(|o| o.package.0.as_str()).collect();
        assert_eq!(packages, vec!["alpha", "beta"]);
        assert!(matches!(report.outcomes[0].status, OutcomeStatus::Updated { .. }));
        assert!(matches!(report.outcomes[1].status, OutcomeStatus::NoUpdateNeeded { .. }));
        assert!(store.text("alpha").expect("alpha").contains("alpha-1.1.tar.gz"));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (store, reconciler) = setup(TapConfig::default());
        let options = BatchOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(store.clone(), reconciler, Scope::All, options).expect("run");
        assert_eq!(report.summary().would_update, 1);
        assert_eq!(store.text("alpha").expect("alpha"), tiny("alpha", "1.0"));
    }

    #[test]
    fn skipped_recipes_are_reported_but_not_checked() {
        let mut config = TapConfig::default();
        config.recipes.insert(
            "alpha".to_string(),
            tapsync_core::RecipeSettings {
                skip: true,
                ..Default::default()
            },
        );
        let (store, reconciler) = setup(config);
        let report = run(store, reconciler, Scope::All, BatchOptions::default()).expect("run");
        assert_eq!(report.outcome("alpha").map(|o| &o.status), Some(&OutcomeStatus::Skipped));
    }

    #[test]
    fn unknown_recipe_in_scope_is_an_error() {
        let (store, reconciler) = setup(TapConfig::default());
        let err = run(store, reconciler, Scope::Recipe("ghost".to_string()), BatchOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn report_serializes_with_status_tags() {
        let (store, reconciler) = setup(TapConfig::default());
        let options = BatchOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(store, reconciler, Scope::All, options).expect("run");
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["outcomes"][0]["status"], "would_update");
        assert_eq!(json["outcomes"][0]["candidate"]["new_version"], "1.1");
        assert_eq!(json["outcomes"][1]["status"], "no_update_needed");
        assert_eq!(json["mode"], "per_package");
    }
}
