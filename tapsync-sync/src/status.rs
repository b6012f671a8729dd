//! Offline tap status: what every recipe declares, without asking upstream.

use serde::{Deserialize, Serialize};

use tapsync_core::{RecipeStore, TapConfig};

use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecipeState {
    Ok {
        version: String,
        upstream: String,
        resources: usize,
        explicit_version: bool,
    },
    Skipped {
        version: String,
    },
    Invalid {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStatus {
    pub name: String,
    pub location: String,
    #[serde(flatten)]
    pub state: RecipeState,
}

/// One row per recipe in the store, in name order.
pub fn collect(store: &dyn RecipeStore, config: &TapConfig) -> Result<Vec<RecipeStatus>, SyncError> {
    let rows = store
        .load_all()?
        .into_iter()
        .map(|(name, loaded)| {
            let location = store.location(&name);
            let state = match loaded {
                Ok(stored) if config.settings(&name).skip => RecipeState::Skipped {
                    version: stored.recipe.version.to_string(),
                },
                Ok(stored) => RecipeState::Ok {
                    version: stored.recipe.version.to_string(),
                    upstream: config.upstream_name(&stored.recipe),
                    resources: stored.recipe.resources.len(),
                    explicit_version: stored.recipe.explicit_version,
                },
                Err(err) => {
                    tracing::warn!("{name}: {err}");
                    RecipeState::Invalid {
                        error: err.to_string(),
                    }
                }
            };
            RecipeStatus {
                name: name.0,
                location,
                state,
            }
        })
        .collect();
    Ok(rows)
}
