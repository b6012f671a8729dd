//! Upstream reconciliation for a single recipe.
//!
//! ## `reconcile` flow
//!
//! 1. Resolve the target version (explicit, or latest stable upstream).
//! 2. Compare with the recipe version; tie or older stops here.
//! 3. Resolve the new source URL (index artifact, else URL template).
//! 4. Download and hash the artifact.
//! 5. Repeat 1-4 for resources whose own package moved, when enabled.
//!
//! Everything here is blocking; the batch pipeline runs it on worker threads.

use std::cmp::Ordering;
use std::sync::Arc;

use tapsync_core::{
    Recipe, Resource, ResourcePolicy, ResourceUpdate, TapConfig, UpdateCandidate, Version,
};

use crate::error::ReconcileError;
use crate::fetch::ArtifactFetcher;
use crate::hash::sha256_reader;
use crate::upstream::{latest_version, IndexArtifact, PackageIndex};

/// Result of reconciling one recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Update(UpdateCandidate),
    NoUpdateNeeded { current: Version },
}

#[derive(Clone)]
pub struct Reconciler {
    index: Arc<dyn PackageIndex>,
    fetcher: Arc<dyn ArtifactFetcher>,
    config: Arc<TapConfig>,
    resources: bool,
}

impl Reconciler {
    pub fn new(index: Arc<dyn PackageIndex>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            index,
            fetcher,
            config: Arc::new(TapConfig::default()),
            resources: true,
        }
    }

    /// Per-recipe upstream names and resource policies come from `config`.
    pub fn with_config(mut self, config: Arc<TapConfig>) -> Self {
        self.config = config;
        self
    }

    /// Leave resource pins alone regardless of configuration.
    pub fn without_resources(mut self) -> Self {
        self.resources = false;
        self
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Decide whether `recipe` needs an update and compute it.
    ///
    /// `target` is used verbatim when given, even if it is not a semantic
    /// version; otherwise the latest stable upstream release is the target.
    pub fn reconcile(
        &self,
        recipe: &Recipe,
        target: Option<&str>,
    ) -> Result<Reconciliation, ReconcileError> {
        let upstream = self.config.upstream_name(recipe);
        let new_version = match target {
            Some(t) => Version::parse(t),
            None => match latest_version(self.index.as_ref(), &upstream)? {
                Some(latest) => latest,
                None => {
                    tracing::debug!("{}: no stable upstream release, keeping {}", recipe.name, recipe.version);
                    return Ok(Reconciliation::NoUpdateNeeded {
                        current: recipe.version.clone(),
                    });
                }
            },
        };

        if !supersedes(&new_version, &recipe.version, target.is_some()) {
            tracing::debug!(
                "{}: {} is current (upstream {})",
                recipe.name,
                recipe.version,
                new_version
            );
            return Ok(Reconciliation::NoUpdateNeeded {
                current: recipe.version.clone(),
            });
        }

        tracing::info!(
            "{}: {} -> {}",
            recipe.name,
            recipe.version,
            new_version
        );
        let artifact = self.index.artifact(&upstream, &new_version)?;
        let new_url = source_url(&upstream, &recipe.url, &recipe.version, &new_version, artifact.as_ref())?;
        let advertised = artifact.and_then(|a| a.sha256);
        let new_sha256 = self.hash(&new_url, advertised.as_deref())?;

        let policy = self.policy(recipe);
        let mut resources = Vec::new();
        if policy.auto_update || policy.rehash_unchanged {
            for resource in &recipe.resources {
                if let Some(update) = self.reconcile_resource(resource, policy)? {
                    resources.push(update);
                }
            }
        }

        Ok(Reconciliation::Update(UpdateCandidate {
            package: recipe.name.clone(),
            upstream_name: upstream,
            old_version: recipe.version.clone(),
            new_version,
            new_url,
            new_sha256,
            resources,
        }))
    }

    fn policy(&self, recipe: &Recipe) -> ResourcePolicy {
        if self.resources {
            self.config.resource_policy(&recipe.name)
        } else {
            ResourcePolicy {
                auto_update: false,
                rehash_unchanged: false,
            }
        }
    }

    fn reconcile_resource(
        &self,
        resource: &Resource,
        policy: ResourcePolicy,
    ) -> Result<Option<ResourceUpdate>, ReconcileError> {
        let Some(current) = resource.version() else {
            tracing::debug!("resource {}: no version in {}", resource.name, resource.url);
            return Ok(None);
        };
        let package = resource.upstream_name();

        if policy.auto_update {
            let latest = latest_version(self.index.as_ref(), &package)?;
            if let Some(latest) = latest.filter(|l| supersedes(l, &current, false)) {
                let artifact = self.index.artifact(&package, &latest)?;
                let url = source_url(&package, &resource.url, &current, &latest, artifact.as_ref())?;
                let advertised = artifact.and_then(|a| a.sha256);
                let sha256 = self.hash(&url, advertised.as_deref())?;
                tracing::info!("resource {}: {} -> {}", resource.name, current, latest);
                return Ok(Some(ResourceUpdate {
                    resource: Resource {
                        name: resource.name.clone(),
                        url,
                        sha256,
                    },
                    old_version: Some(current),
                    new_version: Some(latest),
                }));
            }
        }

        if policy.rehash_unchanged {
            let sha256 = self.hash(&resource.url, None)?;
            if !sha256.eq_ignore_ascii_case(&resource.sha256) {
                tracing::warn!("resource {}: digest changed without a version bump", resource.name);
                return Ok(Some(ResourceUpdate {
                    resource: Resource {
                        name: resource.name.clone(),
                        url: resource.url.clone(),
                        sha256,
                    },
                    old_version: Some(current.clone()),
                    new_version: Some(current),
                }));
            }
        }
        Ok(None)
    }

    fn hash(&self, url: &str, advertised: Option<&str>) -> Result<String, ReconcileError> {
        let failed = |message: String| ReconcileError::HashComputation {
            url: url.to_string(),
            message,
        };
        let mut body = self.fetcher.open(url).map_err(|e| failed(e.to_string()))?;
        let (digest, len) = sha256_reader(&mut body).map_err(|e| failed(e.to_string()))?;
        if len == 0 {
            return Err(failed("empty response body".to_string()));
        }
        if let Some(expected) = advertised {
            if !digest.eq_ignore_ascii_case(expected) {
                return Err(failed(format!(
                    "checksum mismatch: index advertises {expected}, got {digest}"
                )));
            }
        }
        Ok(digest)
    }
}

/// `true` when `candidate` should replace `current`.
fn supersedes(candidate: &Version, current: &Version, explicit: bool) -> bool {
    if explicit && candidate.semantic().is_none() {
        return candidate != current;
    }
    match candidate.cmp_release(current) {
        Some(ordering) => ordering == Ordering::Greater,
        None => explicit && candidate != current,
    }
}

fn source_url(
    package: &str,
    current_url: &str,
    current: &Version,
    next: &Version,
    artifact: Option<&IndexArtifact>,
) -> Result<String, ReconcileError> {
    if let Some(artifact) = artifact {
        return Ok(artifact.url.clone());
    }
    tapsync_core::UrlTemplate::from_url(current_url, current.as_str())
        .map(|template| template.render(next.as_str()))
        .ok_or_else(|| ReconcileError::NoSourceUrl {
            package: package.to_string(),
            version: next.to_string(),
        })
}
