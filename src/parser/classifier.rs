//! Classification of raw package.json dependency values.
//!
//! A value can be a version expression, a local path, an `npm:` alias, a VCS
//! reference, a tarball URL, or something unrecognised. Rules are applied in
//! that order; the first match wins.

use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

/// Ref recorded for VCS references without an explicit `#ref`.
pub const DEFAULT_VCS_REF: &str = "main";

const LOCAL_PATH_PREFIXES: &[&str] = &["file:", "./", "~/", "../", "/", "workspace:"];

static GITHUB_SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<repo>[\w-]+/[\w.-]+?)(?:#(?P<reference>[\w/.-]+))?$").expect("valid regex")
});

static VCS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:git\+)?(?:https?|git|ssh)://(?:[\w-]+(?::\S+)?@)?[\w.-]+(?::\d+)?[/:](?P<path>[\w/-]+?)(?:\.git)?(?:#(?P<reference>[\w/.-]+))?$",
    )
    .expect("valid regex")
});

/// Typed location of a dependency value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Version or range expression; `*` is the wildcard.
    Version(String),
    /// Repository normalised to `https://github.com/<owner>/<repo>` plus ref.
    Vcs { url: String, reference: String },
    /// `npm:<target>[@<range>]`.
    Alias { target: String, range: Option<String> },
    /// Remote tarball.
    Tarball(String),
    /// Filesystem or workspace path.
    LocalPath(String),
    Unknown,
}

/// Classify a dependency value.
pub fn classify(raw: &str) -> Locator {
    let value = raw.trim();

    if value == "*" {
        return Locator::Version(value.to_string());
    }
    if is_version_expression(value) {
        return Locator::Version(value.to_string());
    }
    if LOCAL_PATH_PREFIXES.iter().any(|p| value.starts_with(p)) {
        return Locator::LocalPath(value.to_string());
    }
    if let Some(spec) = value.strip_prefix("npm:") {
        let (target, range) = split_alias(spec);
        return Locator::Alias { target, range };
    }
    if let Some((url, reference)) = parse_vcs(value) {
        return Locator::Vcs { url, reference };
    }
    if value.ends_with(".tgz") || value.ends_with(".tar.gz") {
        return Locator::Tarball(value.to_string());
    }

    trace!("Unclassified dependency value: {}", value);
    Locator::Unknown
}

/// Check whether a value is a version expression.
///
/// `||`, `,` and `-` combine sub-expressions; every side must validate on
/// its own. A value that already parses as a single version (pre-releases
/// such as `1.0.0-beta.1`) is accepted before splitting on `-`.
pub fn is_version_expression(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if value.contains("||") {
        return value.split("||").all(is_version_expression);
    }
    if value.contains(',') {
        return value.split(',').all(is_version_expression);
    }
    if is_version_atom(value) {
        return true;
    }
    if value.contains('-') {
        return value.split('-').all(is_version_expression);
    }
    // Space separated comparators (">= 1.2.3 < 2.0.0") behave like ','.
    if value.contains(char::is_whitespace) {
        let mut parts = value.split_whitespace().peekable();
        let mut atoms = Vec::new();
        while let Some(part) = parts.next() {
            if part.chars().all(|c| "^><=~".contains(c)) {
                match parts.next() {
                    Some(version) => atoms.push(format!("{}{}", part, version)),
                    None => return false,
                }
            } else {
                atoms.push(part.to_string());
            }
        }
        return atoms.iter().all(|a| is_version_atom(a));
    }
    false
}

/// A single version with its range operators stripped.
fn is_version_atom(value: &str) -> bool {
    let stripped: String = value.chars().filter(|c| !"^><=~".contains(*c)).collect();
    let stripped = stripped.trim().trim_start_matches('v');
    if stripped.is_empty() {
        return false;
    }
    if stripped == "*" || stripped.eq_ignore_ascii_case("x") {
        return true;
    }

    // Pad partial versions ("1", "1.2", "1.x") to three components.
    let (core, suffix) = match stripped.find(['-', '+']) {
        Some(idx) => stripped.split_at(idx),
        None => (stripped, ""),
    };
    let mut components: Vec<&str> = core.split('.').collect();
    if components.len() > 3 || components.iter().any(|c| c.is_empty()) {
        return false;
    }
    if components.len() < 3 && !suffix.is_empty() {
        return false;
    }
    while components.len() < 3 {
        components.push("0");
    }
    let numeric: Vec<String> = components
        .iter()
        .map(|c| {
            if *c == "*" || c.eq_ignore_ascii_case("x") {
                "0".to_string()
            } else {
                c.to_string()
            }
        })
        .collect();

    semver::Version::parse(&format!("{}{}", numeric.join("."), suffix)).is_ok()
}

/// Split `target@range` of an alias; a leading `@` belongs to the scope.
fn split_alias(spec: &str) -> (String, Option<String>) {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(idx) => {
            let at = idx + search_from;
            let range = spec[at + 1..].trim();
            (
                spec[..at].to_string(),
                (!range.is_empty()).then(|| range.to_string()),
            )
        }
        None => (spec.to_string(), None),
    }
}

/// Normalise a VCS reference to `(https://github.com/<owner>/<repo>, ref)`.
fn parse_vcs(value: &str) -> Option<(String, String)> {
    if value.contains("github:") {
        // The ref of a `github:` value is always the default branch.
        let repo = value.replace("github:", "");
        let repo = repo.split('#').next().unwrap_or_default();
        return Some((
            format!("https://github.com/{}", repo.trim_end_matches(".git")),
            DEFAULT_VCS_REF.to_string(),
        ));
    }

    if let Some(caps) = GITHUB_SHORTHAND.captures(value) {
        let repo = &caps["repo"];
        let reference = caps
            .name("reference")
            .map(|m| m.as_str())
            .unwrap_or(DEFAULT_VCS_REF);
        return Some((format!("https://github.com/{}", repo), reference.to_string()));
    }

    let caps = VCS_URL.captures(value)?;
    let reference = caps
        .name("reference")
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_VCS_REF);
    Some((
        format!("https://github.com/{}", &caps["path"]),
        reference.to_string(),
    ))
}
