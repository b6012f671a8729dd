//! Dry-run unified diff support for `tapsync diff`.

use std::path::{Component, Path};

use similar::TextDiff;

use tapsync_core::{RecipeName, RecipeStore, UpdateCandidate};

use crate::{writer, SyncError};

/// A single recipe diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDiff {
    pub package: String,
    pub location: String,
    pub unified_diff: String,
}

/// Render what applying each candidate would write and diff it against the
/// stored text. No recipes are written.
///
/// Headers name files as `<formula_dir>/<name>.rb`, with `formula_dir`
/// given relative to the tap root.
pub fn diff_candidates<'a>(
    store: &dyn RecipeStore,
    formula_dir: &Path,
    candidates: impl IntoIterator<Item = &'a UpdateCandidate>,
) -> Result<Vec<RecipeDiff>, SyncError> {
    let mut diffs = Vec::new();
    for candidate in candidates {
        let stored = store.load(&candidate.package)?;
        let rendered = writer::render_update(&stored, candidate)?;
        if rendered == stored.text {
            continue;
        }
        let file = header_path(formula_dir, &candidate.package);
        diffs.push(RecipeDiff {
            package: candidate.package.0.clone(),
            location: store.location(&candidate.package),
            unified_diff: unified_diff(&file, &stored.text, &rendered),
        });
    }
    Ok(diffs)
}

/// `dir/name.rb` with `/` separators and no `./` segments.
pub fn header_path(dir: &Path, name: &RecipeName) -> String {
    let mut parts: Vec<String> = dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir | Component::RootDir | Component::Prefix(_)))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.push(format!("{}.rb", name.0));
    parts.join("/")
}

pub fn unified_diff(file: &str, old: &str, new: &str) -> String {
    let old_header = format!("a/{file}");
    let new_header = format!("b/{file}");
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}
