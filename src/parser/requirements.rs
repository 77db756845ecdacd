//! Parser for pip requirements files.
//!
//! Handles name based requirements (`requests[security]>=2.0,<3 ; python_version > "3"`)
//! and URL based ones (`pkg @ git+https://host/org/pkg.git@v1#egg=pkg`, or a bare
//! URL carrying `#egg=`). A `#fragment` on a URL becomes the version label.

use crate::types::{DependencyReference, OriginKind, ANY_VERSION};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?P<rest>.*)$")
        .expect("valid regex")
});

static SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<op>~=|===|==|!=|<=|>=|<|>)\s*(?P<version>[A-Za-z0-9.*+!_-]+)$")
        .expect("valid regex")
});

static EGG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#.*egg=(?P<name>[A-Za-z0-9._-]+)").expect("valid regex"));

const VCS_PREFIXES: &[&str] = &["git+", "hg+", "svn+", "bzr+"];

/// Parse a requirements file.
pub fn parse(content: &str) -> Vec<DependencyReference> {
    let mut dependencies = Vec::new();

    for line in logical_lines(content) {
        let line = strip_comment(&line);
        let line = line.trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }

        match parse_line(line) {
            Some(dep) => dependencies.push(dep),
            None => debug!("Skipping unparseable requirement: {}", line),
        }
    }

    dependencies
}

/// Join `\` continuation lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        if let Some(head) = raw.trim_end().strip_suffix('\\') {
            current.push_str(head);
            current.push(' ');
            continue;
        }
        current.push_str(raw);
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines
}

/// Remove a `#` comment; a `#` glued to a URL is a fragment, not a comment.
fn strip_comment(line: &str) -> String {
    if line.trim_start().starts_with('#') {
        return String::new();
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(idx) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

fn parse_line(line: &str) -> Option<DependencyReference> {
    if is_bare_url(line) {
        return parse_bare_url(line);
    }

    let caps = NAME.captures(line)?;
    let name = caps["name"].to_string();
    let rest = caps["rest"].trim();

    if let Some(url) = rest.strip_prefix('@') {
        let url = url.split(" ;").next().unwrap_or_default().trim();
        if url.is_empty() {
            return None;
        }
        return Some(url_reference(name, url));
    }

    // Environment markers follow the specifiers.
    let specs = rest.split(';').next().unwrap_or_default().trim();
    let specs = specs
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(specs);

    if specs.is_empty() {
        return Some(DependencyReference::new(name, ANY_VERSION, OriginKind::ExplicitVersion));
    }

    let mut normalized = Vec::new();
    for spec in specs.split(',') {
        let caps = SPECIFIER.captures(spec.trim())?;
        normalized.push(format!("{}{}", &caps["op"], &caps["version"]));
    }

    Some(DependencyReference::new(
        name,
        normalized.join(","),
        OriginKind::ExplicitVersion,
    ))
}

fn is_bare_url(line: &str) -> bool {
    VCS_PREFIXES.iter().any(|p| line.starts_with(p))
        || line.starts_with("http://")
        || line.starts_with("https://")
}

/// A URL line without a `name @` prefix needs `#egg=` to name the package.
fn parse_bare_url(line: &str) -> Option<DependencyReference> {
    let url = line.split_whitespace().next()?;
    let name = EGG.captures(url)?["name"].to_string();
    Some(url_reference(name, url))
}

fn url_reference(name: String, url: &str) -> DependencyReference {
    let version = url
        .rsplit_once('#')
        .map(|(_, fragment)| fragment.to_string())
        .unwrap_or_else(|| ANY_VERSION.to_string());

    let origin = if url.starts_with("file:") {
        OriginKind::LocalPath
    } else if VCS_PREFIXES.iter().any(|p| url.starts_with(p)) {
        OriginKind::VcsUrl
    } else {
        OriginKind::TarballUrl
    };

    // Probing happens over HTTPS; drop the VCS scheme prefix and fragment.
    let locator = VCS_PREFIXES
        .iter()
        .find_map(|p| url.strip_prefix(p))
        .unwrap_or(url);
    let locator = locator.split('#').next().unwrap_or(locator);

    DependencyReference::new(name, version, origin).with_locator(locator)
}
