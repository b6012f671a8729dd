//! Domain types for tap recipes.
//!
//! A [`Recipe`] is the structured view of one formula file. The text itself is
//! owned by the store; the writer patches it (see [`crate::recipe`]).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed recipe identifier (the formula file stem, e.g. `ossin`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipeName(pub String);

impl fmt::Display for RecipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RecipeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecipeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl RecipeName {
    /// Derive the recipe name from a formula class name: `PythonDateutil`
    /// becomes `python-dateutil`.
    pub fn from_class_name(class_name: &str) -> Self {
        let mut out = String::with_capacity(class_name.len() + 4);
        for (i, ch) in class_name.chars().enumerate() {
            if ch.is_ascii_uppercase() {
                if i > 0 {
                    out.push('-');
                }
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch);
            }
        }
        Self(out)
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A release version as written upstream or in a recipe.
///
/// `X`, `X.Y` and `X.Y.Z` are padded to a semantic version. Anything carrying
/// dev/rc/post tags or more than three components has no semantic form and is
/// never considered stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    semantic: Option<semver::Version>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            raw: raw.to_owned(),
            semantic: parse_semantic(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn semantic(&self) -> Option<&semver::Version> {
        self.semantic.as_ref()
    }

    /// A release that may be proposed without being asked for explicitly.
    pub fn is_stable(&self) -> bool {
        matches!(&self.semantic, Some(v) if v.pre.is_empty())
    }

    /// Semantic ordering; `None` when either side has no semantic form.
    pub fn cmp_semantic(&self, other: &Version) -> Option<Ordering> {
        match (&self.semantic, &other.semantic) {
            (Some(a), Some(b)) => Some(a.cmp_precedence(b)),
            _ => None,
        }
    }

    /// Ordering on the numeric release part (`2.9.0.post0` compares as
    /// `2.9.0`). `None` when either side has no leading number.
    pub fn cmp_release(&self, other: &Version) -> Option<Ordering> {
        if let Some(ordering) = self.cmp_semantic(other) {
            return Some(ordering);
        }
        Some(release_prefix(&self.raw)?.cmp_precedence(&release_prefix(&other.raw)?))
    }
}

fn release_prefix(raw: &str) -> Option<semver::Version> {
    let mut nums = [0u64; 3];
    let mut found = 0;
    for part in raw.split('.').take(3) {
        let digits: &str = &part[..part.find(|c: char| !c.is_ascii_digit()).unwrap_or(part.len())];
        if digits.is_empty() {
            break;
        }
        nums[found] = digits.parse().ok()?;
        found += 1;
        if digits.len() != part.len() {
            break;
        }
    }
    (found > 0).then(|| semver::Version::new(nums[0], nums[1], nums[2]))
}

fn parse_semantic(raw: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(raw) {
        return Some(v);
    }
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() > 3 {
        return None;
    }
    let mut nums = [0u64; 3];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    Some(semver::Version::new(nums[0], nums[1], nums[2]))
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

// ---------------------------------------------------------------------------
// URL template
// ---------------------------------------------------------------------------

/// A source URL with its version replaced by a placeholder.
///
/// Only the last occurrence of the version inside the final path segment is
/// templated, so digests and directory names earlier in the URL stay literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    prefix: String,
    suffix: String,
}

impl UrlTemplate {
    /// Build a template from a concrete URL and the version it embeds.
    ///
    /// Returns `None` when the version does not appear in the file name.
    pub fn from_url(url: &str, version: &str) -> Option<Self> {
        if version.is_empty() {
            return None;
        }
        let segment_start = url.rfind('/').map(|i| i + 1).unwrap_or(0);
        let offset = url[segment_start..].rfind(version)?;
        let start = segment_start + offset;
        Some(Self {
            prefix: url[..start].to_owned(),
            suffix: url[start + version.len()..].to_owned(),
        })
    }

    pub fn render(&self, version: &str) -> String {
        format!("{}{}{}", self.prefix, version, self.suffix)
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{version}}{}", self.prefix, self.suffix)
    }
}

/// Archive file name of a source URL, without query or fragment.
pub fn artifact_file_name(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    path.rsplit('/').next().unwrap_or(path)
}

/// Split an sdist-style file name (`python-dateutil-2.9.0.post0.tar.gz`) into
/// its package stem and version.
pub fn split_artifact_name(file_name: &str) -> Option<(String, String)> {
    let caps = crate::recipe::artifact_name_regex().captures(file_name)?;
    Some((caps["stem"].to_owned(), caps["version"].to_owned()))
}

/// Index-style package name: lower-case with `_` and `.` folded to `-`.
pub fn normalize_package_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A pinned transitive dependency (`resource "name" do ... end`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub sha256: String,
}

impl Resource {
    /// Version embedded in the resource's archive file name.
    pub fn version(&self) -> Option<Version> {
        split_artifact_name(artifact_file_name(&self.url)).map(|(_, v)| Version::parse(&v))
    }

    /// Upstream package name: the resource name, normalized.
    pub fn upstream_name(&self) -> String {
        normalize_package_name(&self.name)
    }
}

/// Structured view of one formula file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub name: RecipeName,
    pub class_name: String,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    pub url: String,
    pub version: Version,
    /// `true` when the version comes from a `version "..."` line rather than
    /// the URL.
    pub explicit_version: bool,
    pub sha256: String,
    pub license: Option<String>,
    pub depends_on: Vec<String>,
    pub resources: Vec<Resource>,
    /// Raw body of `def install`, opaque to the engine.
    pub install: Option<String>,
    /// Raw body of `test do`, opaque to the engine.
    pub test: Option<String>,
}

impl Recipe {
    pub fn url_template(&self) -> Option<UrlTemplate> {
        UrlTemplate::from_url(&self.url, self.version.as_str())
    }

    /// Package name upstream, inferred from the source archive's file name.
    pub fn inferred_upstream_name(&self) -> String {
        split_artifact_name(artifact_file_name(&self.url))
            .map(|(stem, _)| normalize_package_name(&stem))
            .unwrap_or_else(|| self.name.0.clone())
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Return this recipe with the candidate's version, URL, hash and
    /// resource pins applied. Every other field is left as is.
    pub fn apply(&self, candidate: &UpdateCandidate) -> Recipe {
        let mut next = self.clone();
        next.version = candidate.new_version.clone();
        next.url = candidate.new_url.clone();
        next.sha256 = candidate.new_sha256.clone();
        for update in &candidate.resources {
            if let Some(slot) = next
                .resources
                .iter_mut()
                .find(|r| r.name == update.resource.name)
            {
                *slot = update.resource.clone();
            } else {
                next.resources.push(update.resource.clone());
            }
        }
        next
    }
}

/// One resource pin recomputed during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    #[serde(flatten)]
    pub resource: Resource,
    pub old_version: Option<Version>,
    pub new_version: Option<Version>,
}

/// The set of field changes for one package. Produced by reconciliation,
/// consumed by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCandidate {
    pub package: RecipeName,
    pub upstream_name: String,
    pub old_version: Version,
    pub new_version: Version,
    pub new_url: String,
    pub new_sha256: String,
    #[serde(default)]
    pub resources: Vec<ResourceUpdate>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_to_recipe_name() {
        assert_eq!(RecipeName::from_class_name("Ossin").0, "ossin");
        assert_eq!(
            RecipeName::from_class_name("PythonDateutil").0,
            "python-dateutil"
        );
    }

    #[test]
    fn short_versions_are_padded() {
        let v = Version::parse("0.1");
        assert_eq!(v.semantic(), Some(&semver::Version::new(0, 1, 0)));
        assert!(v.is_stable());
        assert_eq!(v.as_str(), "0.1");
    }

    #[test]
    fn dev_and_rc_versions_are_not_stable() {
        for raw in ["1.0rc1", "1.0.dev0", "2.9.0.post0", "1.2.3-beta.1", "1.2.3.4"] {
            assert!(!Version::parse(raw).is_stable(), "{raw} must not be stable");
        }
    }

    #[test]
    fn semantic_ordering() {
        let a = Version::parse("0.1.1");
        let b = Version::parse("0.1.2");
        assert_eq!(a.cmp_semantic(&b), Some(Ordering::Less));
        assert_eq!(Version::parse("1.0").cmp_semantic(&Version::parse("1.0.0")), Some(Ordering::Equal));
        assert_eq!(Version::parse("1.0rc1").cmp_semantic(&a), None);
    }

    #[test]
    fn release_ordering_ignores_post_tags() {
        let post = Version::parse("2.9.0.post0");
        assert_eq!(post.cmp_release(&Version::parse("2.9.0")), Some(Ordering::Equal));
        assert_eq!(post.cmp_release(&Version::parse("2.9.1")), Some(Ordering::Less));
        assert_eq!(Version::parse("1.0rc1").cmp_release(&Version::parse("0.9")), Some(Ordering::Greater));
        assert_eq!(Version::parse("main").cmp_release(&Version::parse("1.0")), None);
    }

    #[test]
    fn template_substitutes_file_name_only() {
        let url = "https://files.example/packages/0.1.1/ossin-0.1.1.tar.gz";
        let t = UrlTemplate::from_url(url, "0.1.1").expect("template");
        assert_eq!(
            t.render("0.1.2"),
            "https://files.example/packages/0.1.1/ossin-0.1.2.tar.gz"
        );
        assert!(UrlTemplate::from_url(url, "9.9").is_none());
    }

    #[test]
    fn artifact_names_split_into_stem_and_version() {
        assert_eq!(
            split_artifact_name("python-dateutil-2.9.0.post0.tar.gz"),
            Some(("python-dateutil".to_string(), "2.9.0.post0".to_string()))
        );
        assert_eq!(
            split_artifact_name("typing_extensions-4.12.2.tar.gz"),
            Some(("typing_extensions".to_string(), "4.12.2".to_string()))
        );
        assert_eq!(split_artifact_name("archive.tar.gz"), None);
        assert_eq!(artifact_file_name("https://h/x/a-1.0.tar.gz?dl=1"), "a-1.0.tar.gz");
    }

    #[test]
    fn version_serde_roundtrip_keeps_raw_form() {
        let yaml = serde_yaml::to_string(&Version::parse("2.9.0.post0")).expect("serialize");
        let back: Version = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back.as_str(), "2.9.0.post0");
        assert!(back.semantic().is_none());
    }
}
