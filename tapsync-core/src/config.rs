//! Tap configuration (`<tap>/tapsync.yaml`).
//!
//! Every key is optional; a missing file yields [`TapConfig::default`].
//!
//! ```yaml
//! formula_dir: Formula
//! index_url: https://pypi.org
//! jobs: 4
//! batch_mode: per_package
//! resources:
//!   auto_update: true
//!   rehash_unchanged: false
//! recipes:
//!   ossin:
//!     package: ossin-cli
//!     auto_update_resources: false
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Recipe, RecipeName};

pub const CONFIG_FILE: &str = "tapsync.yaml";

/// How a batch run commits its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Every successful package is written on its own.
    #[default]
    PerPackage,
    /// Nothing is written unless every package succeeded or was already current.
    Aggregate,
}

/// Resource (pinned dependency) handling during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Bump resources whose own upstream package has a newer stable release.
    pub auto_update: bool,
    /// Re-fetch and re-hash resources whose version did not change.
    pub rehash_unchanged: bool,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            auto_update: true,
            rehash_unchanged: false,
        }
    }
}

/// Per-recipe overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecipeSettings {
    /// Upstream package name when it differs from the archive stem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_update_resources: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rehash_unchanged: Option<bool>,
    /// Excluded from scheduled runs; explicit triggers still reach it.
    pub skip: bool,
}

/// Root of `tapsync.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub formula_dir: PathBuf,
    pub index_url: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub package_timeout_secs: u64,
    pub jobs: usize,
    pub batch_mode: BatchMode,
    pub schedule_interval_secs: u64,
    pub resources: ResourcePolicy,
    pub recipes: BTreeMap<String, RecipeSettings>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            formula_dir: PathBuf::from("Formula"),
            index_url: "https://pypi.org".to_string(),
            request_timeout_secs: 10,
            download_timeout_secs: 60,
            package_timeout_secs: 120,
            jobs: 4,
            batch_mode: BatchMode::default(),
            schedule_interval_secs: 24 * 60 * 60,
            resources: ResourcePolicy::default(),
            recipes: BTreeMap::new(),
        }
    }
}

impl TapConfig {
    pub fn settings(&self, name: &RecipeName) -> RecipeSettings {
        self.recipes.get(&name.0).cloned().unwrap_or_default()
    }

    /// Global resource policy with the recipe's overrides applied.
    pub fn resource_policy(&self, name: &RecipeName) -> ResourcePolicy {
        let settings = self.settings(name);
        ResourcePolicy {
            auto_update: settings
                .auto_update_resources
                .unwrap_or(self.resources.auto_update),
            rehash_unchanged: settings
                .rehash_unchanged
                .unwrap_or(self.resources.rehash_unchanged),
        }
    }

    /// Upstream package name: explicit override, else the archive stem.
    pub fn upstream_name(&self, recipe: &Recipe) -> String {
        self.settings(&recipe.name)
            .package
            .unwrap_or_else(|| recipe.inferred_upstream_name())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.jobs == 0 {
            return Err(invalid("`jobs` must be at least 1"));
        }
        if self.request_timeout_secs == 0
            || self.download_timeout_secs == 0
            || self.package_timeout_secs == 0
        {
            return Err(invalid("timeouts must be greater than zero"));
        }
        if self.schedule_interval_secs == 0 {
            return Err(invalid("`schedule_interval_secs` must be greater than zero"));
        }
        Ok(())
    }
}

/// `<tap>/tapsync.yaml`: pure, no I/O.
pub fn config_path_at(tap_root: &Path) -> PathBuf {
    tap_root.join(CONFIG_FILE)
}

/// Directory holding the formula files; relative `formula_dir` values are
/// resolved against the tap root.
pub fn formula_dir_at(tap_root: &Path, config: &TapConfig) -> PathBuf {
    if config.formula_dir.is_absolute() {
        config.formula_dir.clone()
    } else {
        tap_root.join(&config.formula_dir)
    }
}

/// Load `<tap>/tapsync.yaml`, falling back to defaults when it is absent.
pub fn load_at(tap_root: &Path) -> Result<TapConfig, ConfigError> {
    let path = config_path_at(tap_root);
    if !path.exists() {
        return Ok(TapConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: TapConfig = if contents.trim().is_empty() {
        TapConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?
    };
    config.validate(&path)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
