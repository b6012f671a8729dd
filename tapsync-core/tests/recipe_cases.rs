//! Formula reader/writer cases over realistic recipe shapes.
//!
//! Each `#[case]` is isolated.

use rstest::rstest;
use tapsync_core::{recipe, RecipeError, Version};

const SHA_A: &str = "0f3c8a0e6f1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5";
const SHA_B: &str = "9999999999999999999999999999999999999999999999999999999999999999";

fn python_formula() -> String {
    format!(
        r#"class PythonDateutil < Formula
  desc "Extensions to the standard Python datetime module"
  homepage "https://github.com/dateutil/dateutil"
  url "https://files.pythonhosted.org/packages/66/c0/python-dateutil-2.9.0.post0.tar.gz"
  sha256 "{SHA_A}"
  license "Apache-2.0"

  head do
    url "https://github.com/dateutil/dateutil.git", branch: "master"
  end

  on_linux do
    depends_on "patchelf" => :build
  end

  resource "six" do
    url "https://files.pythonhosted.org/packages/71/39/six-1.16.0.tar.gz"
    sha256 "{SHA_B}"
  end

  def install
    if OS.mac?
      ohai "mac"
    end
    virtualenv_install_with_resources
  end
end
"#
    )
}

fn git_archive_formula() -> String {
    format!(
        "class Tool < Formula\n  url \"https://github.com/acme/tool/archive/refs/heads/main.tar.gz\"\n  version \"2024.10\"\n  sha256 \"{SHA_A}\"\nend\n"
    )
}

#[rstest]
#[case::dateutil(python_formula(), "python-dateutil", "2.9.0.post0", false, 1)]
#[case::explicit(git_archive_formula(), "tool", "2024.10", true, 0)]
fn reads_recipe_shapes(
    #[case] text: String,
    #[case] name: &str,
    #[case] version: &str,
    #[case] explicit: bool,
    #[case] resources: usize,
) {
    let recipe = recipe::read(&text).expect("read");
    assert_eq!(recipe.name.0, name);
    assert_eq!(recipe.version.as_str(), version);
    assert_eq!(recipe.explicit_version, explicit);
    assert_eq!(recipe.resources.len(), resources);
    assert_eq!(recipe.sha256, SHA_A);
}

#[test]
fn head_block_url_does_not_override_top_level_url() {
    let recipe = recipe::read(&python_formula()).expect("read");
    assert!(recipe.url.ends_with("python-dateutil-2.9.0.post0.tar.gz"));
    assert_eq!(recipe.inferred_upstream_name(), "python-dateutil");
    assert!(recipe.depends_on.is_empty(), "nested depends_on is not top-level");
}

#[rstest]
#[case::python(python_formula())]
#[case::explicit(git_archive_formula())]
fn read_then_write_is_identity(#[case] text: String) {
    let recipe = recipe::read(&text).expect("read");
    assert_eq!(recipe::write(&recipe, &text).expect("write"), text);
}

#[test]
fn resource_bump_touches_only_resource_lines() {
    let text = python_formula();
    let mut recipe = recipe::read(&text).expect("read");
    recipe.resources[0].url = recipe.resources[0].url.replace("1.16.0", "1.17.0");
    recipe.resources[0].sha256 = SHA_A.to_string();

    let out = recipe::write(&recipe, &text).expect("write");
    let changed: Vec<usize> = text
        .lines()
        .zip(out.lines())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, _)| i + 1)
        .collect();
    assert_eq!(changed, vec![17, 18]);
    let reread = recipe::read(&out).expect("reread");
    assert_eq!(reread.resources[0].version(), Some(Version::parse("1.17.0")));
}

#[rstest]
#[case::no_class("  url \"https://h/a-1.0.tar.gz\"\n")]
#[case::no_url("class A < Formula\n  sha256 \"0000000000000000000000000000000000000000000000000000000000000000\"\nend\n")]
#[case::bad_hex("class A < Formula\n  url \"https://h/a-1.0.tar.gz\"\n  sha256 \"zzzz\"\nend\n")]
#[case::resource_without_sha(
    "class A < Formula\n  url \"https://h/a-1.0.tar.gz\"\n  sha256 \"0000000000000000000000000000000000000000000000000000000000000000\"\n  resource \"b\" do\n    url \"https://h/b-1.0.tar.gz\"\n  end\nend\n"
)]
#[case::no_version("class A < Formula\n  url \"https://h/archive/main.tar.gz\"\n  sha256 \"0000000000000000000000000000000000000000000000000000000000000000\"\nend\n")]
fn malformed_recipes_are_parse_errors(#[case] text: &str) {
    let err = recipe::read(text).unwrap_err();
    assert!(err.is_parse_error(), "expected parse error, got: {err}");
}

#[test]
fn implied_version_cannot_drift_from_url() {
    let text = python_formula();
    let mut recipe = recipe::read(&text).expect("read");
    recipe.version = Version::parse("3.0.0");
    let err = recipe::write(&recipe, &text).unwrap_err();
    assert!(matches!(err, RecipeError::Unwritable { .. }), "got: {err}");
}
