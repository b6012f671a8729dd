//! Formula reader and span-preserving writer.
//!
//! # Reading
//!
//! [`read`] scans the Ruby DSL line by line, tracking block nesting so that
//! only top-level `url`/`sha256`/`version` lines and the `url`/`sha256` lines of
//! `resource` blocks are picked up. `bottle do`, `head do`, `on_macos do` and
//! friends nest their own `url`/`sha256` lines and are skipped. Heredoc bodies
//! are skipped verbatim.
//!
//! # Writing
//!
//! [`write`] never re-serializes the recipe. It re-reads the original text to
//! recover the byte spans of every value, diffs the model against it, and
//! splices in only what changed:
//!
//! - changed scalar values are replaced inside their quotes;
//! - resources missing from the model lose their whole block;
//! - new resources are inserted after the last existing resource block
//!   (falling back to just before `def install`, then before the class `end`).
//!
//! `write(&read(text)?, text)` returns `text` unchanged.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RecipeError;
use crate::types::{artifact_file_name, split_artifact_name, Recipe, RecipeName, Resource, Version};

const DEFAULT_INDENT: &str = "  ";

// ---------------------------------------------------------------------------
// 1. Regexes
// ---------------------------------------------------------------------------

pub(crate) fn artifact_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<stem>[A-Za-z0-9][A-Za-z0-9._+-]*?)-v?(?P<version>\d+(?:\.\d+)*[A-Za-z0-9.+!]*?)\.(?:tar\.gz|tgz|tar\.bz2|tar\.xz|zip)$",
        )
        .expect("artifact name regex")
    })
}

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^class\s+(\w+)\s*<\s*Formula\b").expect("class regex"))
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(\s*)(url|sha256|version|desc|homepage|license)\s+"((?:[^"\\]|\\.)*)""#)
            .expect("field regex")
    })
}

fn depends_on_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*depends_on\s+"([^"]+)""#).expect("depends_on regex"))
}

fn resource_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*resource\s+"([^"]+)"\s+do\s*(?:#.*)?$"#).expect("resource regex")
    })
}

fn do_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bdo\s*(?:\|[^|]*\|)?\s*(?:#.*)?$").expect("do regex"))
}

fn heredoc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<<[~-]?([A-Z_][A-Z0-9_]*)").expect("heredoc regex"))
}

// ---------------------------------------------------------------------------
// 2. Layout (byte spans of the original text)
// ---------------------------------------------------------------------------

/// Half-open byte range into the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Default)]
struct ResourceLayout {
    url: Option<Span>,
    sha256: Option<Span>,
    /// From the start of the `resource` line to just past its `end` line.
    block: Option<Span>,
}

#[derive(Debug, Clone, Default)]
struct Layout {
    url: Option<Span>,
    sha256: Option<Span>,
    version: Option<Span>,
    desc: Option<Span>,
    homepage: Option<Span>,
    license: Option<Span>,
    resources: Vec<ResourceLayout>,
    install_line: Option<usize>,
    class_end_line: Option<usize>,
    indent: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Block {
    Class,
    Resource(usize),
    Install { body_start: usize },
    Test { body_start: usize },
    Other,
}

#[derive(Default)]
struct Fields {
    class_name: Option<String>,
    url: Option<String>,
    sha256: Option<(String, usize)>,
    version: Option<String>,
    desc: Option<String>,
    homepage: Option<String>,
    license: Option<String>,
    depends_on: Vec<String>,
    resources: Vec<(String, Option<String>, Option<(String, usize)>, usize)>,
    install: Option<String>,
    test: Option<String>,
}

// ---------------------------------------------------------------------------
// 3. Read
// ---------------------------------------------------------------------------

/// Parse a formula into its structured fields.
///
/// Fails with [`RecipeError::MissingField`] when the class, `url` or `sha256`
/// is absent and with [`RecipeError::Malformed`] when a digest is not 64 hex
/// characters, a block is left open, or no version can be determined.
pub fn read(text: &str) -> Result<Recipe, RecipeError> {
    parse(text).map(|(recipe, _)| recipe)
}

fn parse(text: &str) -> Result<(Recipe, Layout), RecipeError> {
    let mut layout = Layout::default();
    let mut fields = Fields::default();
    let mut stack: Vec<Block> = Vec::new();
    let mut heredoc: Option<String> = None;
    let mut offset = 0usize;

    for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let line_start = offset;
        let line_end = offset + raw_line.len();
        offset = line_end;

        let line = raw_line.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim();

        if let Some(terminator) = heredoc.as_deref() {
            if trimmed == terminator {
                heredoc = None;
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if stack.is_empty() {
            if let Some(caps) = class_regex().captures(trimmed) {
                if fields.class_name.is_some() {
                    return Err(malformed(line_no, "more than one formula class"));
                }
                fields.class_name = Some(caps[1].to_owned());
                stack.push(Block::Class);
            }
            continue;
        }

        if is_end(trimmed) {
            match stack.pop() {
                Some(Block::Resource(i)) => {
                    layout.resources[i].block = Some(Span {
                        start: fields.resources[i].3,
                        end: line_end,
                    });
                }
                Some(Block::Install { body_start }) => {
                    fields.install = Some(text[body_start..line_start].to_owned());
                }
                Some(Block::Test { body_start }) => {
                    fields.test = Some(text[body_start..line_start].to_owned());
                }
                Some(Block::Class) => layout.class_end_line = Some(line_start),
                Some(Block::Other) | None => {}
            }
            continue;
        }

        let top = stack.last().copied();
        match (stack.len(), top) {
            (1, Some(Block::Class)) => {
                if let Some(caps) = field_regex().captures(line) {
                    let Some(m) = caps.get(3) else { continue };
                    if layout.indent.is_none() {
                        layout.indent = Some(caps[1].to_owned());
                    }
                    let span = Span {
                        start: line_start + m.start(),
                        end: line_start + m.end(),
                    };
                    let slot = match &caps[2] {
                        "url" => &mut layout.url,
                        "sha256" => &mut layout.sha256,
                        "version" => &mut layout.version,
                        "desc" => &mut layout.desc,
                        "homepage" => &mut layout.homepage,
                        _ => &mut layout.license,
                    };
                    // First occurrence wins; later duplicates are left alone.
                    if slot.is_none() {
                        *slot = Some(span);
                        let value = unescape(m.as_str());
                        match &caps[2] {
                            "url" => fields.url = Some(value),
                            "sha256" => fields.sha256 = Some((value, line_no)),
                            "version" => fields.version = Some(value),
                            "desc" => fields.desc = Some(value),
                            "homepage" => fields.homepage = Some(value),
                            _ => fields.license = Some(value),
                        }
                    }
                } else if let Some(caps) = depends_on_regex().captures(line) {
                    fields.depends_on.push(caps[1].to_owned());
                } else if let Some(caps) = resource_regex().captures(line) {
                    let i = fields.resources.len();
                    fields.resources.push((caps[1].to_owned(), None, None, line_start));
                    layout.resources.push(ResourceLayout::default());
                    stack.push(Block::Resource(i));
                } else if trimmed == "def install" {
                    layout.install_line = Some(line_start);
                    stack.push(Block::Install {
                        body_start: line_end,
                    });
                } else if trimmed == "test do" {
                    stack.push(Block::Test {
                        body_start: line_end,
                    });
                } else if opens_block(trimmed) {
                    stack.push(Block::Other);
                }
            }
            (2, Some(Block::Resource(i))) => {
                if let Some(caps) = field_regex().captures(line) {
                    let Some(m) = caps.get(3) else { continue };
                    let span = Span {
                        start: line_start + m.start(),
                        end: line_start + m.end(),
                    };
                    let value = unescape(m.as_str());
                    match &caps[2] {
                        "url" if layout.resources[i].url.is_none() => {
                            layout.resources[i].url = Some(span);
                            fields.resources[i].1 = Some(value);
                        }
                        "sha256" if layout.resources[i].sha256.is_none() => {
                            layout.resources[i].sha256 = Some(span);
                            fields.resources[i].2 = Some((value, line_no));
                        }
                        _ => {}
                    }
                } else if opens_block(trimmed) {
                    stack.push(Block::Other);
                }
            }
            _ => {
                if opens_block(trimmed) {
                    stack.push(Block::Other);
                }
            }
        }

        if let Some(caps) = heredoc_regex().captures(line) {
            heredoc = Some(caps[1].to_owned());
        }
    }

    if !stack.is_empty() {
        return Err(malformed(
            text.lines().count(),
            "unterminated block (missing `end`)",
        ));
    }

    let class_name = fields
        .class_name
        .ok_or(RecipeError::MissingField { field: "class" })?;
    let url = fields.url.ok_or(RecipeError::MissingField { field: "url" })?;
    let (sha256, sha_line) = fields
        .sha256
        .ok_or(RecipeError::MissingField { field: "sha256" })?;
    check_digest(&sha256, sha_line)?;

    let explicit_version = fields.version.is_some();
    let version = match fields.version {
        Some(v) => Version::parse(&v),
        None => split_artifact_name(artifact_file_name(&url))
            .map(|(_, v)| Version::parse(&v))
            .ok_or(RecipeError::MissingField { field: "version" })?,
    };

    let mut resources = Vec::with_capacity(fields.resources.len());
    for (name, url, sha, line) in fields.resources {
        let url = url.ok_or_else(|| malformed(line_of(text, line), &format!("resource `{name}` has no url")))?;
        let (sha256, sha_line) = sha
            .ok_or_else(|| malformed(line_of(text, line), &format!("resource `{name}` has no sha256")))?;
        check_digest(&sha256, sha_line)?;
        resources.push(Resource { name, url, sha256 });
    }

    let recipe = Recipe {
        name: RecipeName::from_class_name(&class_name),
        class_name,
        desc: fields.desc,
        homepage: fields.homepage,
        url,
        version,
        explicit_version,
        sha256,
        license: fields.license,
        depends_on: fields.depends_on,
        resources,
        install: fields.install,
        test: fields.test,
    };
    Ok((recipe, layout))
}

fn is_end(trimmed: &str) -> bool {
    trimmed == "end"
        || trimmed
            .strip_prefix("end")
            .is_some_and(|rest| rest.trim_start().starts_with('#') && rest.starts_with(char::is_whitespace))
}

fn opens_block(trimmed: &str) -> bool {
    const KEYWORDS: [&str; 8] = [
        "def ", "if ", "unless ", "case ", "while ", "until ", "class ", "module ",
    ];
    trimmed == "begin"
        || KEYWORDS.iter().any(|k| trimmed.starts_with(k)) && !trimmed.ends_with(" end")
        || do_block_regex().is_match(trimmed)
}

fn check_digest(digest: &str, line: usize) -> Result<(), RecipeError> {
    if is_sha256_hex(digest) {
        Ok(())
    } else {
        Err(malformed(
            line,
            &format!("sha256 `{digest}` is not a 64-character hex digest"),
        ))
    }
}

/// `true` for a lower- or upper-case 64-character hex string.
pub fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

fn malformed(line: usize, message: &str) -> RecipeError {
    RecipeError::Malformed {
        line,
        message: message.to_owned(),
    }
}

fn line_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset.min(text.len())].matches('\n').count() + 1
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('"' | '\\')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// 4. Write
// ---------------------------------------------------------------------------

struct Edit {
    span: Span,
    text: String,
}

/// Splice `recipe` into `original`, touching only the spans whose values
/// changed.
///
/// Returns [`RecipeError::Unwritable`] when the model changes something that
/// has no span to patch (e.g. a `license` the original never declared) or a
/// field the writer does not own (`class`, `depends_on`, install/test bodies).
pub fn write(recipe: &Recipe, original: &str) -> Result<String, RecipeError> {
    let (current, layout) = parse(original)?;
    let mut edits = Vec::new();

    if recipe.class_name != current.class_name {
        return Err(unwritable("class", "renaming the formula class is not supported"));
    }
    if recipe.depends_on != current.depends_on {
        return Err(unwritable("depends_on", "dependency declarations are edited by hand"));
    }
    if recipe.install != current.install || recipe.test != current.test {
        return Err(unwritable("install", "install and test blocks are opaque"));
    }

    patch("url", Some(&current.url), Some(&recipe.url), layout.url, &mut edits)?;
    patch("sha256", Some(&current.sha256), Some(&recipe.sha256), layout.sha256, &mut edits)?;
    patch("desc", current.desc.as_deref(), recipe.desc.as_deref(), layout.desc, &mut edits)?;
    patch(
        "homepage",
        current.homepage.as_deref(),
        recipe.homepage.as_deref(),
        layout.homepage,
        &mut edits,
    )?;
    patch(
        "license",
        current.license.as_deref(),
        recipe.license.as_deref(),
        layout.license,
        &mut edits,
    )?;

    if recipe.version != current.version {
        if current.explicit_version {
            patch(
                "version",
                Some(current.version.as_str()),
                Some(recipe.version.as_str()),
                layout.version,
                &mut edits,
            )?;
        } else {
            let implied = split_artifact_name(artifact_file_name(&recipe.url)).map(|(_, v)| v);
            if implied.as_deref() != Some(recipe.version.as_str()) {
                return Err(unwritable(
                    "version",
                    "the version is implied by the url, which does not carry the new version",
                ));
            }
        }
    }

    for (old, spans) in current.resources.iter().zip(&layout.resources) {
        match recipe.resource(&old.name) {
            Some(new) => {
                patch("resource url", Some(&old.url), Some(&new.url), spans.url, &mut edits)?;
                patch(
                    "resource sha256",
                    Some(&old.sha256),
                    Some(&new.sha256),
                    spans.sha256,
                    &mut edits,
                )?;
            }
            None => {
                if let Some(block) = spans.block {
                    edits.push(Edit {
                        span: removal_span(original, block),
                        text: String::new(),
                    });
                }
            }
        }
    }

    let added: Vec<&Resource> = recipe
        .resources
        .iter()
        .filter(|r| current.resource(&r.name).is_none())
        .collect();
    if !added.is_empty() {
        let indent = layout.indent.as_deref().unwrap_or(DEFAULT_INDENT);
        let blocks = added
            .iter()
            .map(|r| render_resource(r, indent))
            .collect::<Vec<_>>()
            .join("\n");
        let last_block = layout.resources.iter().filter_map(|r| r.block).last();
        let edit = if let Some(last) = last_block {
            Edit {
                span: Span { start: last.end, end: last.end },
                text: format!("\n{blocks}"),
            }
        } else if let Some(pos) = layout.install_line {
            Edit {
                span: Span { start: pos, end: pos },
                text: format!("{blocks}\n"),
            }
        } else {
            let pos = layout.class_end_line.unwrap_or(original.len());
            Edit {
                span: Span { start: pos, end: pos },
                text: format!("\n{blocks}"),
            }
        };
        edits.push(edit);
    }

    Ok(apply_edits(original, edits))
}

fn patch(
    field: &str,
    old: Option<&str>,
    new: Option<&str>,
    span: Option<Span>,
    edits: &mut Vec<Edit>,
) -> Result<(), RecipeError> {
    if old == new {
        return Ok(());
    }
    match (span, new) {
        (Some(span), Some(value)) => {
            edits.push(Edit {
                span,
                text: escape(value),
            });
            Ok(())
        }
        (_, None) => Err(unwritable(field, "removing a field is not supported")),
        (None, Some(_)) => Err(unwritable(field, "the original recipe does not declare it")),
    }
}

fn unwritable(field: &str, reason: &str) -> RecipeError {
    RecipeError::Unwritable {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Extend a block removal over the blank line that precedes it.
fn removal_span(text: &str, block: Span) -> Span {
    if block.start == 0 {
        return block;
    }
    let prev_end = block.start - 1;
    let prev_start = text[..prev_end].rfind('\n').map(|i| i + 1).unwrap_or(0);
    if text[prev_start..prev_end].trim().is_empty() {
        Span {
            start: prev_start,
            end: block.end,
        }
    } else {
        block
    }
}

fn render_resource(resource: &Resource, indent: &str) -> String {
    format!(
        "{indent}resource \"{name}\" do\n{indent}{indent}url \"{url}\"\n{indent}{indent}sha256 \"{sha}\"\n{indent}end\n",
        name = escape(&resource.name),
        url = escape(&resource.url),
        sha = escape(&resource.sha256),
    )
}

fn apply_edits(original: &str, mut edits: Vec<Edit>) -> String {
    // Later spans first so earlier offsets stay valid.
    edits.sort_by(|a, b| (b.span.start, b.span.end).cmp(&(a.span.start, a.span.end)));
    let mut out = original.to_owned();
    for edit in edits {
        out.replace_range(edit.span.start..edit.span.end, &edit.text);
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
