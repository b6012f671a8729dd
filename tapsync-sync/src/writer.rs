//! Apply an [`UpdateCandidate`] to a stored recipe.
//!
//! The new text is always produced by [`recipe::write`] against the text the
//! recipe was loaded from, so untouched lines are byte-identical.

use tapsync_core::{recipe, RecipeStore, StoredRecipe, UpdateCandidate};

use crate::error::SyncError;

/// New recipe text with `candidate` applied. Nothing is written.
pub fn render_update(stored: &StoredRecipe, candidate: &UpdateCandidate) -> Result<String, SyncError> {
    let next = stored.recipe.apply(candidate);
    let text = recipe::write(&next, &stored.text).map_err(|source| SyncError::Recipe {
        name: candidate.package.0.clone(),
        source,
    })?;

    // The written text must read back to exactly the applied model.
    let mut reread = recipe::read(&text).map_err(|source| SyncError::Recipe {
        name: candidate.package.0.clone(),
        source,
    })?;
    reread.name = next.name.clone();
    if reread != next {
        return Err(SyncError::Recipe {
            name: candidate.package.0.clone(),
            source: tapsync_core::RecipeError::Unwritable {
                field: "recipe".to_string(),
                reason: "written text does not read back to the updated recipe".to_string(),
            },
        });
    }
    Ok(text)
}

/// Render and persist one update.
pub fn apply_update(
    store: &dyn RecipeStore,
    stored: &StoredRecipe,
    candidate: &UpdateCandidate,
) -> Result<(), SyncError> {
    let text = render_update(stored, candidate)?;
    store.put(&candidate.package, &text)?;
    tracing::info!("wrote: {}", store.location(&candidate.package));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapsync_core::{MemoryRecipeStore, RecipeName, Resource, ResourceUpdate, Version};

    const SHA_A: &str = "ad6d1a2c3b4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8";
    const SHA_B: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn text() -> String {
        format!(
            "class Ossin < Formula\n  url \"https://h/ossin-0.1.1.tar.gz\"\n  sha256 \"{SHA_A}\"\n\n  resource \"click\" do\n    url \"https://h/click-8.1.7.tar.gz\"\n    sha256 \"{SHA_A}\"\n  end\nend\n"
        )
    }

    fn candidate() -> UpdateCandidate {
        UpdateCandidate {
            package: RecipeName::from("ossin"),
            upstream_name: "ossin".to_string(),
            old_version: Version::parse("0.1.1"),
            new_version: Version::parse("0.1.2"),
            new_url: "https://h/ossin-0.1.2.tar.gz".to_string(),
            new_sha256: SHA_B.to_string(),
            resources: vec![ResourceUpdate {
                resource: Resource {
                    name: "click".to_string(),
                    url: "https://h/click-8.1.8.tar.gz".to_string(),
                    sha256: SHA_B.to_string(),
                },
                old_version: Some(Version::parse("8.1.7")),
                new_version: Some(Version::parse("8.1.8")),
            }],
        }
    }

    #[test]
    fn apply_update_writes_through_store() {
        let store = MemoryRecipeStore::with_recipes([("ossin", text())]);
        let stored = store.load(&RecipeName::from("ossin")).expect("load");
        apply_update(&store, &stored, &candidate()).expect("apply");

        let written = store.text("ossin").expect("text");
        assert!(written.contains("ossin-0.1.2.tar.gz"));
        assert!(written.contains("click-8.1.8.tar.gz"));
        assert!(!written.contains(SHA_A));
    }

    #[test]
    fn unwritable_version_is_rejected_before_store() {
        let store = MemoryRecipeStore::with_recipes([("ossin", text())]);
        let stored = store.load(&RecipeName::from("ossin")).expect("load");
        let mut bad = candidate();
        bad.new_url = "https://h/archive/main.tar.gz".to_string();

        let err = apply_update(&store, &stored, &bad).unwrap_err();
        assert!(matches!(err, SyncError::Recipe { .. }), "got: {err}");
        assert_eq!(store.text("ossin").expect("text"), text());
    }
}
