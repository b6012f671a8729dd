//! tapsync core library: recipe model, formula reader/writer, recipe store,
//! tap configuration.
//!
//! - [`types`]: newtypes and domain structs
//! - [`recipe`]: [`recipe::read`] / [`recipe::write`]
//! - [`store`]: [`RecipeStore`] with disk and in-memory implementations
//! - [`config`]: `tapsync.yaml`
//! - [`error`]: [`RecipeError`], [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod recipe;
pub mod store;
pub mod types;

pub use config::{BatchMode, RecipeSettings, ResourcePolicy, TapConfig};
pub use error::{ConfigError, RecipeError, StoreError};
pub use store::{FsRecipeStore, MemoryRecipeStore, RecipeStore, StoredRecipe};
pub use types::{
    Recipe, RecipeName, Resource, ResourceUpdate, UpdateCandidate, UrlTemplate, Version,
};
