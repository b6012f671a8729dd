//! A tap on disk: configuration, recipe store and reconciler wired together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tapsync_core::{config, FsRecipeStore, RecipeStore, TapConfig};

use crate::diff::{self, RecipeDiff};
use crate::error::SyncError;
use crate::fetch::{ArtifactFetcher, HttpFetcher};
use crate::pipeline::{self, BatchOptions, BatchReport, PackageOutcome, Scope};
use crate::reconcile::Reconciler;
use crate::status::{self, RecipeStatus};
use crate::trigger::{self, TriggerEvent};
use crate::upstream::{PackageIndex, PypiIndex};

#[derive(Clone)]
pub struct Tap {
    pub root: PathBuf,
    pub config: Arc<TapConfig>,
    pub store: Arc<dyn RecipeStore>,
    pub reconciler: Arc<Reconciler>,
}

impl Tap {
    /// Open the tap at `root` against the configured package index.
    pub fn open(root: &Path) -> Result<Self, SyncError> {
        let config = config::load_at(root)?;
        let index = PypiIndex::new(&config.index_url, config.request_timeout());
        let fetcher = HttpFetcher::new(config.download_timeout());
        Ok(Self::with_upstream(
            root,
            config,
            Arc::new(index),
            Arc::new(fetcher),
        ))
    }

    /// Same as [`Tap::open`] with caller-supplied upstream clients.
    pub fn with_upstream(
        root: &Path,
        config: TapConfig,
        index: Arc<dyn PackageIndex>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        let config = Arc::new(config);
        let store = FsRecipeStore::new(config::formula_dir_at(root, &config));
        let reconciler = Reconciler::new(index, fetcher).with_config(config.clone());
        Self {
            root: root.to_path_buf(),
            config,
            store: Arc::new(store),
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn without_resources(mut self) -> Self {
        let reconciler = self.reconciler.as_ref().clone().without_resources();
        self.reconciler = Arc::new(reconciler);
        self
    }

    pub fn formula_dir(&self) -> PathBuf {
        config::formula_dir_at(&self.root, &self.config)
    }

    /// Unified diffs for the candidates of a dry-run `report`, with headers
    /// relative to the tap root.
    pub fn diff(&self, report: &BatchReport) -> Result<Vec<RecipeDiff>, SyncError> {
        let formula_dir = self.formula_dir();
        let relative = formula_dir.strip_prefix(&self.root).unwrap_or(&formula_dir);
        diff::diff_candidates(self.store.as_ref(), relative, report.candidates())
    }

    pub fn run(&self, scope: Scope, options: BatchOptions) -> Result<BatchReport, SyncError> {
        pipeline::run(self.store.clone(), self.reconciler.clone(), scope, options)
    }

    pub async fn run_async(
        &self,
        scope: Scope,
        options: BatchOptions,
    ) -> Result<BatchReport, SyncError> {
        pipeline::run_async(self.store.clone(), self.reconciler.clone(), scope, options).await
    }

    pub fn trigger(&self, event: &TriggerEvent, dry_run: bool) -> Result<PackageOutcome, SyncError> {
        trigger::handle(event, self.store.clone(), self.reconciler.clone(), dry_run)
    }

    pub async fn trigger_async(
        &self,
        event: &TriggerEvent,
        dry_run: bool,
    ) -> Result<PackageOutcome, SyncError> {
        trigger::handle_async(event, self.store.clone(), self.reconciler.clone(), dry_run).await
    }

    pub fn status(&self) -> Result<Vec<RecipeStatus>, SyncError> {
        status::collect(self.store.as_ref(), &self.config)
    }
}
