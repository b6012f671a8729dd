//! Recipe store and tap config integration tests over a temporary tap.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use tapsync_core::{
    config, recipe, FsRecipeStore, RecipeName, RecipeStore, StoreError, Version,
};

const SHA: &str = "ad6d1a2c3b4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8";
const NEW_SHA: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn ossin() -> String {
    format!(
        "class Ossin < Formula\n  desc \"OSINT helper\"\n  url \"https://files.example/ossin-0.1.1.tar.gz\"\n  sha256 \"{SHA}\"\n\n  def install\n    bin.install \"ossin\"\n  end\nend\n"
    )
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn loads_every_recipe_in_formula_dir() {
    let tap = assert_fs::TempDir::new().expect("tempdir");
    tap.child("Formula/ossin.rb").write_str(&ossin()).expect("write");
    tap.child("Formula/broken.rb")
        .write_str("class Broken < Formula\n")
        .expect("write");

    let cfg = config::load_at(tap.path()).expect("config");
    let store = FsRecipeStore::new(config::formula_dir_at(tap.path(), &cfg));
    let all = store.load_all().expect("load_all");

    assert_eq!(all.len(), 2);
    assert!(matches!(all[0].1, Err(StoreError::Recipe { .. })), "broken sorts first");
    let ossin = all[1].1.as_ref().expect("ossin loads");
    assert_eq!(ossin.recipe.version, Version::parse("0.1.1"));
}

#[test]
fn missing_recipe_is_not_found_with_path() {
    let tap = assert_fs::TempDir::new().expect("tempdir");
    let store = FsRecipeStore::new(tap.path().join("Formula"));
    let err = store.load(&RecipeName::from("ghost")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("ghost.rb"));
}

// ---------------------------------------------------------------------------
// 2. Write back
// ---------------------------------------------------------------------------

#[test]
fn put_writes_patched_text_and_leaves_no_tmp() {
    let tap = assert_fs::TempDir::new().expect("tempdir");
    let file = tap.child("Formula/ossin.rb");
    file.write_str(&ossin()).expect("write");

    let store = FsRecipeStore::new(tap.path().join("Formula"));
    let name = RecipeName::from("ossin");
    let loaded = store.load(&name).expect("load");

    let mut next = loaded.recipe.clone();
    next.url = next.url.replace("0.1.1", "0.1.2");
    next.version = Version::parse("0.1.2");
    next.sha256 = NEW_SHA.to_string();
    let text = recipe::write(&next, &loaded.text).expect("write");
    store.put(&name, &text).expect("put");

    file.assert(predicate::str::contains("ossin-0.1.2.tar.gz"));
    file.assert(predicate::str::contains(NEW_SHA));
    file.assert(predicate::str::contains("bin.install \"ossin\""));
    tap.child("Formula/ossin.rb.tapsync.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn relative_formula_dir_resolves_against_tap_root() {
    let tap = assert_fs::TempDir::new().expect("tempdir");
    tap.child("tapsync.yaml")
        .write_str("formula_dir: recipes\n")
        .expect("write");
    tap.child("recipes/ossin.rb").write_str(&ossin()).expect("write");

    let cfg = config::load_at(tap.path()).expect("config");
    let store = FsRecipeStore::new(config::formula_dir_at(tap.path(), &cfg));
    let names = store.names().expect("names");
    assert_eq!(names, vec![RecipeName::from("ossin")]);
}
