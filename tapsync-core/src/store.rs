//! Recipe repository.
//!
//! # Storage layout
//!
//! ```text
//! <tap>/
//!   tapsync.yaml
//!   Formula/
//!     <recipe>.rb      (one file per recipe; the file stem is the recipe name)
//! ```
//!
//! Reconciliation only ever talks to a [`RecipeStore`]; [`FsRecipeStore`] is
//! the on-disk implementation and [`MemoryRecipeStore`] backs tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{io_err, StoreError};
use crate::recipe;
use crate::types::{Recipe, RecipeName};

const RECIPE_EXT: &str = "rb";

/// A recipe together with the text it was read from.
#[derive(Debug, Clone)]
pub struct StoredRecipe {
    pub recipe: Recipe,
    pub text: String,
}

/// Load-all / get / put-one over a recipe collection.
pub trait RecipeStore: Send + Sync {
    /// All recipe names, sorted.
    fn names(&self) -> Result<Vec<RecipeName>, StoreError>;

    /// Raw text of one recipe.
    fn load_text(&self, name: &RecipeName) -> Result<String, StoreError>;

    /// Replace one recipe's text. Implementations must never leave a
    /// partially-written recipe behind.
    fn put(&self, name: &RecipeName, text: &str) -> Result<(), StoreError>;

    /// Human-readable location of a recipe (file path for the disk store).
    fn location(&self, name: &RecipeName) -> String;

    /// Load and parse one recipe. The recipe's name is the store name, not
    /// the one derived from its class.
    fn load(&self, name: &RecipeName) -> Result<StoredRecipe, StoreError> {
        let text = self.load_text(name)?;
        let mut recipe = recipe::read(&text).map_err(|source| StoreError::Recipe {
            name: name.0.clone(),
            source,
        })?;
        recipe.name = name.clone();
        Ok(StoredRecipe { recipe, text })
    }

    /// Load every recipe. A recipe that fails to load is reported in place
    /// rather than aborting the listing.
    fn load_all(
        &self,
    ) -> Result<Vec<(RecipeName, Result<StoredRecipe, StoreError>)>, StoreError> {
        Ok(self
            .names()?
            .into_iter()
            .map(|name| {
                let loaded = self.load(&name);
                (name, loaded)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// 1. Filesystem store
// ---------------------------------------------------------------------------

/// Recipes stored as `<dir>/<name>.rb`.
#[derive(Debug, Clone)]
pub struct FsRecipeStore {
    dir: PathBuf,
}

impl FsRecipeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<name>.rb`: pure, no I/O.
    pub fn recipe_path(&self, name: &RecipeName) -> PathBuf {
        self.dir.join(format!("{}.{RECIPE_EXT}", name.0))
    }
}

impl RecipeStore for FsRecipeStore {
    fn names(&self) -> Result<Vec<RecipeName>, StoreError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut names: Vec<RecipeName> = std::fs::read_dir(&self.dir)
            .map_err(|e| io_err(&self.dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|x| x.to_str()) != Some(RECIPE_EXT) {
                    return None;
                }
                path.file_stem()
                    .map(|stem| RecipeName::from(stem.to_string_lossy().into_owned()))
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn load_text(&self, name: &RecipeName) -> Result<String, StoreError> {
        let path = self.recipe_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound {
                name: name.0.clone(),
                location: path.display().to_string(),
            });
        }
        std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))
    }

    /// Write flow: `<name>.rb.tapsync.tmp` sibling → copy permissions → `rename`.
    /// The `.tmp` lives in the same directory as the target so the rename never
    /// crosses filesystems.
    fn put(&self, name: &RecipeName, text: &str) -> Result<(), StoreError> {
        let path = self.recipe_path(name);
        let tmp = path.with_file_name(format!("{}.{RECIPE_EXT}.tapsync.tmp", name.0));
        atomic_replace(&path, &tmp, text)
    }

    fn location(&self, name: &RecipeName) -> String {
        self.recipe_path(name).display().to_string()
    }
}

fn atomic_replace(path: &Path, tmp: &Path, text: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, text).map_err(|e| io_err(tmp, e))?;
    if let Ok(meta) = std::fs::metadata(path) {
        if let Err(e) = std::fs::set_permissions(tmp, meta.permissions()) {
            let _ = std::fs::remove_file(tmp);
            return Err(io_err(tmp, e));
        }
    }
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. In-memory store
// ---------------------------------------------------------------------------

/// Recipes held in memory, keyed by name.
#[derive(Debug, Default)]
pub struct MemoryRecipeStore {
    recipes: RwLock<BTreeMap<RecipeName, String>>,
}

impl MemoryRecipeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipes<I, N, T>(recipes: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<RecipeName>,
        T: Into<String>,
    {
        let store = Self::new();
        for (name, text) in recipes {
            store.insert(name, text);
        }
        store
    }

    pub fn insert(&self, name: impl Into<RecipeName>, text: impl Into<String>) {
        let mut guard = self.recipes.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(name.into(), text.into());
    }

    /// Current text of a recipe, if present.
    pub fn text(&self, name: &str) -> Option<String> {
        let guard = self.recipes.read().unwrap_or_else(|e| e.into_inner());
        guard.get(&RecipeName::from(name)).cloned()
    }
}

impl RecipeStore for MemoryRecipeStore {
    fn names(&self) -> Result<Vec<RecipeName>, StoreError> {
        let guard = self.recipes.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.keys().cloned().collect())
    }

    fn load_text(&self, name: &RecipeName) -> Result<String, StoreError> {
        let guard = self.recipes.read().unwrap_or_else(|e| e.into_inner());
        guard.get(name).cloned().ok_or_else(|| StoreError::NotFound {
            name: name.0.clone(),
            location: self.location(name),
        })
    }

    fn put(&self, name: &RecipeName, text: &str) -> Result<(), StoreError> {
        self.insert(name.clone(), text);
        Ok(())
    }

    fn location(&self, name: &RecipeName) -> String {
        format!("memory:{}", name.0)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
