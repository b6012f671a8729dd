//! Reconciliation properties against a simulated upstream.

use std::sync::Arc;

use rstest::rstest;
use tapsync_core::{recipe, Recipe, TapConfig, Version};
use tapsync_sync::{
    hash::sha256_hex, IndexArtifact, ReconcileError, Reconciler, Reconciliation, StaticFetcher,
    StaticIndex,
};

const OLD_SHA: &str = "ad6d1a2c3b4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8";
const BASE: &str = "https://files.pythonhosted.org/packages/source/o/ossin";

fn recipe_at(version: &str) -> (String, Recipe) {
    let text = format!(
        r#"class Ossin < Formula
  include Language::Python::Virtualenv

  desc "Open source intelligence CLI"
  homepage "https://github.com/example/ossin"
  url "{BASE}/ossin-{version}.tar.gz"
  sha256 "{OLD_SHA}"
  license "MIT"

  depends_on "python@3.12"

  def install
    virtualenv_install_with_resources
  end

  test do
    system bin/"ossin", "--version"
  end
end
"#
    );
    let recipe = recipe::read(&text).expect("read");
    (text, recipe)
}

fn reconciler(index: StaticIndex, fetcher: StaticFetcher) -> Reconciler {
    Reconciler::new(Arc::new(index), Arc::new(fetcher))
}

// ---------------------------------------------------------------------------
// 1. Equal or older upstream
// ---------------------------------------------------------------------------

#[rstest]
#[case("0.1.1", "0.1.1")]
#[case("1.0", "1.0.0")]
#[case("2.0.0", "1.9.9")]
#[case("0.1.1", "0.1.0")]
#[case("2.9.0.post0", "2.9.0.post0")]
#[case("1.2.3.4", "1.2.3.4")]
#[case("2.32.0.20240914", "2.32.0.20240914")]
fn no_update_when_upstream_is_not_newer(#[case] current: &str, #[case] upstream: &str) {
    let (_, recipe) = recipe_at(current);
    let index = StaticIndex::new().with_release("ossin", upstream, None);
    let fetcher = Arc::new(StaticFetcher::new());
    let outcome = Reconciler::new(Arc::new(index), fetcher.clone())
        .reconcile(&recipe, None)
        .expect("reconcile");
    assert_eq!(
        outcome,
        Reconciliation::NoUpdateNeeded {
            current: Version::parse(current)
        }
    );
    assert!(fetcher.requested().is_empty(), "nothing is downloaded");
}

// ---------------------------------------------------------------------------
// 2. Newer upstream
// ---------------------------------------------------------------------------

#[rstest]
#[case("0.1.1", "0.1.2")]
#[case("0.1.9", "0.1.10")]
#[case("1.2", "2.0")]
fn newer_upstream_yields_templated_url_and_artifact_digest(
    #[case] current: &str,
    #[case] upstream: &str,
) {
    let (_, recipe) = recipe_at(current);
    let new_url = format!("{BASE}/ossin-{upstream}.tar.gz");
    let body = format!("sdist of ossin {upstream}");
    let index = StaticIndex::new()
        .with_release("ossin", current, None)
        .with_release("ossin", upstream, None);
    let fetcher = StaticFetcher::new().with_body(&new_url, body.clone());

    let outcome = reconciler(index, fetcher).reconcile(&recipe, None).expect("reconcile");
    let Reconciliation::Update(candidate) = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(candidate.new_version, Version::parse(upstream));
    assert_eq!(candidate.new_url, new_url);
    assert_eq!(candidate.new_sha256, sha256_hex(body.as_bytes()));
    assert!(candidate.resources.is_empty());
}

#[test]
fn ossin_example() {
    let (text, recipe) = recipe_at("0.1.1");
    let artifact = b"ossin 0.1.2 source tarball".to_vec();
    let index = StaticIndex::new()
        .with_release("ossin", "0.1.1", None)
        .with_release("ossin", "0.1.2", None)
        .with_release("ossin", "0.2.0rc1", None);
    let fetcher = StaticFetcher::new().with_body(&format!("{BASE}/ossin-0.1.2.tar.gz"), artifact.clone());

    let Reconciliation::Update(candidate) =
        reconciler(index, fetcher).reconcile(&recipe, None).expect("reconcile")
    else {
        panic!("expected an update");
    };
    assert_eq!(candidate.package.0, "ossin");
    assert_eq!(candidate.old_version.as_str(), "0.1.1");
    assert_eq!(candidate.new_version.as_str(), "0.1.2");
    assert!(candidate.new_url.ends_with("/ossin-0.1.2.tar.gz"));
    assert_eq!(candidate.new_sha256, sha256_hex(&artifact));

    // Apply, write, re-read: only version/url/hash move.
    let next = recipe.apply(&candidate);
    let written = recipe::write(&next, &text).expect("write");
    let reread = recipe::read(&written).expect("reread");
    assert_eq!(reread.version, candidate.new_version);
    assert_eq!(reread.url, candidate.new_url);
    assert_eq!(reread.sha256, candidate.new_sha256);

    let mut expected = recipe.clone();
    expected.version = candidate.new_version.clone();
    expected.url = candidate.new_url.clone();
    expected.sha256 = candidate.new_sha256.clone();
    assert_eq!(reread, expected);
}

#[test]
fn index_canonical_url_wins_over_template() {
    let (_, recipe) = recipe_at("0.1.1");
    let hashed_url = "https://files.pythonhosted.org/packages/ab/cd/0123/ossin-0.1.2.tar.gz";
    let body = b"canonical".to_vec();
    let index = StaticIndex::new().with_release(
        "ossin",
        "0.1.2",
        Some(IndexArtifact {
            url: hashed_url.to_string(),
            sha256: Some(sha256_hex(&body)),
        }),
    );
    let fetcher = StaticFetcher::new().with_body(hashed_url, body);
    let Reconciliation::Update(candidate) =
        reconciler(index, fetcher).reconcile(&recipe, None).expect("reconcile")
    else {
        panic!("expected an update");
    };
    assert_eq!(candidate.new_url, hashed_url);
}

// ---------------------------------------------------------------------------
// 3. Explicit targets
// ---------------------------------------------------------------------------

#[test]
fn explicit_prerelease_target_is_used_verbatim() {
    let (_, recipe) = recipe_at("0.1.1");
    let url = format!("{BASE}/ossin-0.2.0rc1.tar.gz");
    let index = StaticIndex::new().with_release("ossin", "0.1.1", None);
    let fetcher = StaticFetcher::new().with_body(&url, "rc");
    let Reconciliation::Update(candidate) = reconciler(index, fetcher)
        .reconcile(&recipe, Some("0.2.0rc1"))
        .expect("reconcile")
    else {
        panic!("expected an update");
    };
    assert_eq!(candidate.new_version.as_str(), "0.2.0rc1");
    assert_eq!(candidate.new_url, url);
}

#[test]
fn explicit_older_target_is_no_update() {
    let (_, recipe) = recipe_at("0.1.1");
    let outcome = reconciler(StaticIndex::new(), StaticFetcher::new())
        .reconcile(&recipe, Some("0.1.0"))
        .expect("reconcile");
    assert!(matches!(outcome, Reconciliation::NoUpdateNeeded { .. }));
}

// ---------------------------------------------------------------------------
// 4. Failures
// ---------------------------------------------------------------------------

#[test]
fn unknown_package_is_not_found() {
    let (_, recipe) = recipe_at("0.1.1");
    let err = reconciler(StaticIndex::new(), StaticFetcher::new())
        .reconcile(&recipe, None)
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound { .. }), "got: {err}");
    assert_eq!(err.kind(), tapsync_sync::ErrorKind::NotFound);
}

#[test]
fn unavailable_index_is_propagated() {
    let (_, recipe) = recipe_at("0.1.1");
    let index = StaticIndex::new().with_unavailable("ossin");
    let err = reconciler(index, StaticFetcher::new())
        .reconcile(&recipe, None)
        .unwrap_err();
    assert_eq!(err.kind(), tapsync_sync::ErrorKind::UpstreamUnavailable);
}

#[test]
fn missing_artifact_is_hash_error() {
    let (_, recipe) = recipe_at("0.1.1");
    let index = StaticIndex::new().with_release("ossin", "0.1.2", None);
    let err = reconciler(index, StaticFetcher::new())
        .reconcile(&recipe, None)
        .unwrap_err();
    assert_eq!(err.kind(), tapsync_sync::ErrorKind::HashComputation);
}

// ---------------------------------------------------------------------------
// 5. Resources
// ---------------------------------------------------------------------------

const RES_SHA: &str = "1111111111111111111111111111111111111111111111111111111111111111";

fn with_resources() -> (String, Recipe) {
    let text = format!(
        r#"class Ossin < Formula
  url "{BASE}/ossin-0.1.1.tar.gz"
  sha256 "{OLD_SHA}"

  resource "click" do
    url "https://files.example/click-8.1.7.tar.gz"
    sha256 "{RES_SHA}"
  end

  resource "rich" do
    url "https://files.example/rich-13.7.1.tar.gz"
    sha256 "{RES_SHA}"
  end

  def install
    virtualenv_install_with_resources
  end
end
"#
    );
    let recipe = recipe::read(&text).expect("read");
    (text, recipe)
}

fn resource_world() -> (StaticIndex, StaticFetcher) {
    let index = StaticIndex::new()
        .with_release("ossin", "0.1.2", None)
        .with_release("click", "8.1.7", None)
        .with_release("click", "8.1.8", None)
        .with_release("rich", "13.7.1", None);
    let fetcher = StaticFetcher::new()
        .with_body(&format!("{BASE}/ossin-0.1.2.tar.gz"), "ossin")
        .with_body("https://files.example/click-8.1.8.tar.gz", "click 8.1.8")
        .with_body("https://files.example/rich-13.7.1.tar.gz", "rich 13.7.1");
    (index, fetcher)
}

#[test]
fn moved_resources_are_bundled_into_the_candidate() {
    let (text, recipe) = with_resources();
    let (index, fetcher) = resource_world();
    let fetcher = Arc::new(fetcher);
    let Reconciliation::Update(candidate) = Reconciler::new(Arc::new(index), fetcher.clone())
        .reconcile(&recipe, None)
        .expect("reconcile")
    else {
        panic!("expected an update");
    };

    assert_eq!(candidate.resources.len(), 1, "only click moved");
    let click = &candidate.resources[0];
    assert_eq!(click.resource.name, "click");
    assert_eq!(click.new_version, Some(Version::parse("8.1.8")));
    assert_eq!(click.resource.sha256, sha256_hex(b"click 8.1.8"));
    assert!(!fetcher.requested().iter().any(|u| u.contains("rich")), "rich is not re-hashed");

    let written = recipe::write(&recipe.apply(&candidate), &text).expect("write");
    let reread = recipe::read(&written).expect("reread");
    assert_eq!(reread.resource("click").map(|r| r.url.as_str()), Some("https://files.example/click-8.1.8.tar.gz"));
    assert_eq!(reread.resource("rich"), recipe.resource("rich"));
}

#[test]
fn rehash_unchanged_reports_drifted_digests() {
    let (_, recipe) = with_resources();
    let (index, fetcher) = resource_world();
    let mut config = TapConfig::default();
    config.resources.rehash_unchanged = true;

    let Reconciliation::Update(candidate) = reconciler(index, fetcher)
        .with_config(Arc::new(config))
        .reconcile(&recipe, None)
        .expect("reconcile")
    else {
        panic!("expected an update");
    };
    let rich = candidate
        .resources
        .iter()
        .find(|r| r.resource.name == "rich")
        .expect("rich re-hashed");
    assert_eq!(rich.old_version, rich.new_version);
    assert_eq!(rich.resource.sha256, sha256_hex(b"rich 13.7.1"));
}

#[test]
fn failing_resource_fails_the_package() {
    let (_, recipe) = with_resources();
    let index = StaticIndex::new()
        .with_release("ossin", "0.1.2", None)
        .with_release("click", "8.1.8", None)
        .with_unavailable("rich");
    let fetcher = StaticFetcher::new()
        .with_body(&format!("{BASE}/ossin-0.1.2.tar.gz"), "ossin")
        .with_body("https://files.example/click-8.1.8.tar.gz", "click");
    let err = reconciler(index, fetcher).reconcile(&recipe, None).unwrap_err();
    assert!(matches!(err, ReconcileError::UpstreamUnavailable { .. }), "got: {err}");
}

#[test]
fn resource_without_stable_release_is_left_unchanged() {
    let (_, recipe) = with_resources();
    let index = StaticIndex::new()
        .with_release("ossin", "0.1.2", None)
        .with_release("click", "8.1.8", None)
        .with_release("rich", "13.7.1.20240914", None);
    let fetcher = StaticFetcher::new()
        .with_body(&format!("{BASE}/ossin-0.1.2.tar.gz"), "ossin")
        .with_body("https://files.example/click-8.1.8.tar.gz", "click");
    let Reconciliation::Update(candidate) = reconciler(index, fetcher)
        .reconcile(&recipe, None)
        .expect("reconcile")
    else {
        panic!("expected an update");
    };
    let names: Vec<_> = candidate.resources.iter().map(|r| r.resource.name.as_str()).collect();
    assert_eq!(names, ["click"]);
}

#[test]
fn without_resources_leaves_pins_alone() {
    let (_, recipe) = with_resources();
    let (index, fetcher) = resource_world();
    let Reconciliation::Update(candidate) = reconciler(index, fetcher)
        .without_resources()
        .reconcile(&recipe, None)
        .expect("reconcile")
    else {
        panic!("expected an update");
    };
    assert!(candidate.resources.is_empty());
}
