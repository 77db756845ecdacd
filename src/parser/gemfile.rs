//! Parser for Bundler Gemfiles.
//!
//! Gemfiles are Ruby, so this is a line scanner rather than a grammar. Blocks
//! are tracked on a stack so that `end` always closes the block it belongs
//! to: `source ... do` blocks change the source of the gems they contain,
//! `git ... do` blocks their repository, `path ... do` blocks make them local,
//! and anything else (`group`, `platforms`, `if`) is only bookkeeping.

use crate::types::{locator_url, DependencyReference, OriginKind, Result, ANY_VERSION};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Source used until the Gemfile declares one.
pub const DEFAULT_SOURCE: &str = "https://rubygems.org";

static SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^source\s*\(?\s*["'](?P<url>[^"']+)["']\s*\)?(?P<block>\s+do(?:\s*\|[^|]*\|)?)?$"#)
        .expect("valid regex")
});

static BLOCK_WITH_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<kind>git|path|github)\s*\(?\s*["'](?P<arg>[^"']+)["'].*\sdo(?:\s*\|[^|]*\|)?$"#)
        .expect("valid regex")
});

static BLOCK_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\sdo(?:\s*\|[^|]*\|)?$").expect("valid regex"));

static CONDITIONAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:if|unless|case|begin|while|until)\b").expect("valid regex"));

static GEM_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^gem\s*\(?\s*["'](?P<name>[\w.-]+)["']"#).expect("valid regex")
});

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^["']\s*(?P<version>(?:[~^><=!]+\s*)?\d+(?:\.\d+)*(?:[.-][\w.]+)?)\s*["']$"#)
        .expect("valid regex")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^:?(?P<key>\w+)(?::\s*|\s*=>\s*)["']?(?P<value>[^"']*)["']?$"#)
        .expect("valid regex")
});

#[derive(Debug, Clone)]
enum Frame {
    Source(String),
    Git(String),
    Path,
    Other,
}

/// Parse a Gemfile.
pub fn parse(content: &str) -> Result<Vec<DependencyReference>> {
    let mut dependencies = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut default_source = DEFAULT_SOURCE.to_string();

    for raw in content.lines() {
        let line = strip_comment(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "end" {
            if stack.pop().is_none() {
                debug!("Unbalanced end in Gemfile");
            }
            continue;
        }

        if let Some(caps) = SOURCE.captures(line) {
            let url = caps["url"].trim_end_matches('/').to_string();
            if caps.name("block").is_some() {
                stack.push(Frame::Source(url));
            } else {
                default_source = url;
            }
            continue;
        }

        if let Some(caps) = BLOCK_WITH_ARG.captures(line) {
            let frame = match &caps["kind"] {
                "path" => Frame::Path,
                "github" => Frame::Git(github_url(&caps["arg"])),
                _ => Frame::Git(normalize_git_url(&caps["arg"])),
            };
            stack.push(frame);
            continue;
        }

        if line.starts_with("gem ") || line.starts_with("gem(") {
            let source = current_source(&stack, &default_source);
            match parse_gem(line, source, &stack) {
                Some(dep) => dependencies.push(dep),
                None => debug!("Skipping gem line: {}", line),
            }
            // `gem 'x' do ... end` is legal, if rare.
            if BLOCK_START.is_match(line) {
                stack.push(Frame::Other);
            }
            continue;
        }

        if BLOCK_START.is_match(line) || CONDITIONAL.is_match(line) {
            stack.push(Frame::Other);
        }
    }

    Ok(dependencies)
}

fn current_source<'a>(stack: &'a [Frame], default_source: &'a str) -> &'a str {
    stack
        .iter()
        .rev()
        .find_map(|f| match f {
            Frame::Source(url) => Some(url.as_str()),
            _ => None,
        })
        .unwrap_or(default_source)
}

fn enclosing_git(stack: &[Frame]) -> Option<&str> {
    stack.iter().rev().find_map(|f| match f {
        Frame::Git(url) => Some(url.as_str()),
        _ => None,
    })
}

fn parse_gem(line: &str, source: &str, stack: &[Frame]) -> Option<DependencyReference> {
    let caps = GEM_NAME.captures(line)?;
    let name = caps["name"].to_string();

    if stack.iter().any(|f| matches!(f, Frame::Path)) {
        debug!("Gem {} comes from a local path block. Ignoring it.", name);
        return None;
    }

    let args = &line[caps.get(0)?.end()..];
    let args = BLOCK_START.replace(args, "");
    let args = args.trim().trim_end_matches(')');

    let mut versions = Vec::new();
    let mut git_url = enclosing_git(stack).map(str::to_string);
    let mut git_ref = None;
    let mut gem_source = source.to_string();

    for part in split_args(args) {
        let part = part.trim();

        if let Some(caps) = VERSION.captures(part) {
            versions.push(caps["version"].split_whitespace().collect::<String>());
            continue;
        }

        let Some(caps) = ATTRIBUTE.captures(part) else {
            continue;
        };
        let value = caps["value"].trim();
        match &caps["key"] {
            "git" if !value.is_empty() => git_url = Some(normalize_git_url(value)),
            "github" if !value.is_empty() => git_url = Some(github_url(value)),
            "source" if !value.is_empty() => gem_source = value.trim_end_matches('/').to_string(),
            "path" if !value.is_empty() => {
                debug!("Gem {} is pulled from local path {}. Ignoring it.", name, value);
                return None;
            }
            "branch" | "tag" | "ref" if !value.is_empty() => git_ref = Some(value.to_string()),
            _ => {}
        }
    }

    let version = if versions.is_empty() {
        git_ref.unwrap_or_else(|| ANY_VERSION.to_string())
    } else {
        versions.join(",")
    };

    if let Some(url) = git_url {
        return Some(DependencyReference::new(name, version, OriginKind::VcsUrl).with_locator(url));
    }

    let dep = DependencyReference::new(&name, version, OriginKind::ExplicitVersion);
    if gem_source.eq_ignore_ascii_case(DEFAULT_SOURCE) {
        Some(dep)
    } else {
        Some(dep.with_locator(format!("{}/api/v1/gems/{}.json", gem_source, name)))
    }
}

/// Split call arguments on commas outside quotes and brackets.
fn split_args(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[' | '{' | '(') => {
                depth += 1;
                current.push(c);
            }
            (None, ']' | '}' | ')') => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            (None, ',') if depth == 0 => parts.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
}

/// Drop a trailing `#` comment that is not inside a string.
fn strip_comment(line: &str) -> String {
    let mut quote: Option<char> = None;
    for (idx, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return line[..idx].to_string(),
            _ => {}
        }
    }
    line.to_string()
}

fn normalize_git_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("git://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{}", rest)
    } else {
        locator_url(url)
    }
}

fn github_url(repo: &str) -> String {
    format!("https://github.com/{}", repo.trim_end_matches(".git"))
}
