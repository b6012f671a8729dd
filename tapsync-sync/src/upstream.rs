//! Upstream package indexes.
//!
//! [`PackageIndex`] is the seam between reconciliation and the network.
//! [`PypiIndex`] speaks the PyPI JSON API; [`StaticIndex`] answers from memory.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;

use tapsync_core::types::normalize_package_name;
use tapsync_core::Version;

use crate::error::ReconcileError;

/// A source artifact the index publishes for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexArtifact {
    pub url: String,
    /// Digest advertised by the index, when it publishes one.
    pub sha256: Option<String>,
}

pub trait PackageIndex: Send + Sync {
    /// Every published version of `package`, in no particular order.
    fn versions(&self, package: &str) -> Result<Vec<Version>, ReconcileError>;

    /// Canonical source artifact for one release, if the index lists one.
    fn artifact(
        &self,
        package: &str,
        version: &Version,
    ) -> Result<Option<IndexArtifact>, ReconcileError>;
}

/// Greatest stable release of `package`.
///
/// Pre-release and non-semantic versions are never chosen. `None` when the
/// package exists but has no stable release at all.
pub fn latest_version(
    index: &dyn PackageIndex,
    package: &str,
) -> Result<Option<Version>, ReconcileError> {
    Ok(index
        .versions(package)?
        .into_iter()
        .filter(Version::is_stable)
        .reduce(|best, v| match v.cmp_semantic(&best) {
            Some(std::cmp::Ordering::Greater) => v,
            _ => best,
        }))
}

// ---------------------------------------------------------------------------
// 1. PyPI
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProjectDoc {
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDoc {
    #[serde(default)]
    urls: Vec<ReleaseFile>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    filename: String,
    url: String,
    packagetype: String,
    #[serde(default)]
    yanked: bool,
    #[serde(default)]
    digests: Digests,
}

#[derive(Debug, Default, Deserialize)]
struct Digests {
    sha256: Option<String>,
}

impl ReleaseFile {
    fn is_sdist(&self) -> bool {
        self.packagetype == "sdist" && self.filename.ends_with(".tar.gz") && !self.yanked
    }
}

/// PyPI JSON API client (`/pypi/<name>/json`, `/pypi/<name>/<version>/json`).
#[derive(Debug, Clone)]
pub struct PypiIndex {
    agent: ureq::Agent,
    base_url: String,
}

impl PypiIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tapsync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `None` on 404.
    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        package: &str,
        url: &str,
    ) -> Result<Option<T>, ReconcileError> {
        let unavailable = |message: String| ReconcileError::UpstreamUnavailable {
            package: package.to_string(),
            message,
        };
        tracing::debug!("GET {url}");
        match self.agent.get(url).call() {
            Ok(response) => response
                .into_json::<T>()
                .map(Some)
                .map_err(|e| unavailable(format!("invalid response from {url}: {e}"))),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(unavailable(format!("HTTP {code} from {url}"))),
            Err(ureq::Error::Transport(t)) => Err(unavailable(t.to_string())),
        }
    }
}

impl PackageIndex for PypiIndex {
    fn versions(&self, package: &str) -> Result<Vec<Version>, ReconcileError> {
        let url = format!("{}/pypi/{package}/json", self.base_url);
        let doc: ProjectDoc =
            self.get_json(package, &url)?
                .ok_or_else(|| ReconcileError::NotFound {
                    package: package.to_string(),
                    reason: format!("{url} returned 404"),
                })?;
        Ok(doc
            .releases
            .into_iter()
            .filter(|(_, files)| files.iter().any(|f| !f.yanked))
            .map(|(version, _)| Version::parse(&version))
            .collect())
    }

    fn artifact(
        &self,
        package: &str,
        version: &Version,
    ) -> Result<Option<IndexArtifact>, ReconcileError> {
        let url = format!("{}/pypi/{package}/{version}/json", self.base_url);
        let Some(doc) = self.get_json::<ReleaseDoc>(package, &url)? else {
            return Ok(None);
        };
        Ok(doc.urls.into_iter().find(ReleaseFile::is_sdist).map(|f| IndexArtifact {
            url: f.url,
            sha256: f.digests.sha256,
        }))
    }
}

// ---------------------------------------------------------------------------
// 2. In-memory index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StaticRelease {
    version: Version,
    artifact: Option<IndexArtifact>,
}

/// Index answering from a fixed release table. Package names are matched
/// after normalization.
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    packages: BTreeMap<String, Vec<StaticRelease>>,
    unavailable: BTreeSet<String>,
    delay: Option<Duration>,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(
        mut self,
        package: &str,
        version: &str,
        artifact: Option<IndexArtifact>,
    ) -> Self {
        self.packages
            .entry(normalize_package_name(package))
            .or_default()
            .push(StaticRelease {
                version: Version::parse(version),
                artifact,
            });
        self
    }

    /// Every query for `package` fails as if the service were down.
    pub fn with_unavailable(mut self, package: &str) -> Self {
        self.unavailable.insert(normalize_package_name(package));
        self
    }

    /// Block every `versions` call for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn releases(&self, package: &str) -> Result<&[StaticRelease], ReconcileError> {
        let key = normalize_package_name(package);
        if self.unavailable.contains(&key) {
            return Err(ReconcileError::UpstreamUnavailable {
                package: package.to_string(),
                message: "service unavailable".to_string(),
            });
        }
        self.packages
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| ReconcileError::NotFound {
                package: package.to_string(),
                reason: "unknown package".to_string(),
            })
    }
}

impl PackageIndex for StaticIndex {
    fn versions(&self, package: &str) -> Result<Vec<Version>, ReconcileError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self
            .releases(package)?
            .iter()
            .map(|r| r.version.clone())
            .collect())
    }

    fn artifact(
        &self,
        package: &str,
        version: &Version,
    ) -> Result<Option<IndexArtifact>, ReconcileError> {
        Ok(self
            .releases(package)?
            .iter()
            .find(|r| &r.version == version)
            .and_then(|r| r.artifact.clone()))
    }
}
