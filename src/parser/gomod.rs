//! go.mod parsing and Go module repository discovery.
//!
//! The parser only knows module paths. Unless a path carries a VCS
//! qualifier, finding the repository behind it takes a request to
//! `https://<path>?go-get=1` and a look at the `go-import` meta tag, which is
//! what [`GoModuleLocator`] does.

use crate::types::{DependencyReference, OriginKind, Result};
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use tracing::{debug, warn};

const VCS_QUALIFIERS: &[&str] = &[".bzr", ".fossil", ".git", ".hg", ".svn"];

static GO_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name=["']go-import["']\s+content=["'](?P<content>[^"']*)["']\s*/?>"#)
        .expect("valid regex")
});

#[derive(Debug, PartialEq, Eq)]
enum Block {
    None,
    Require,
    Ignored,
}

/// Parse a go.mod file.
pub fn parse(content: &str) -> Result<Vec<DependencyReference>> {
    let mut dependencies = Vec::new();
    let mut block = Block::None;

    for raw in content.lines() {
        let line = raw.split("//").next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        if block != Block::None {
            if line.starts_with(')') {
                block = Block::None;
                continue;
            }
            if block == Block::Require {
                push_requirement(line, &mut dependencies);
            }
            continue;
        }

        let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        if rest == "(" {
            // replace, exclude and retract blocks never declare dependencies
            block = if directive == "require" {
                Block::Require
            } else {
                Block::Ignored
            };
            continue;
        }

        if directive == "require" {
            push_requirement(rest, &mut dependencies);
        }
    }

    Ok(dependencies)
}

fn push_requirement(line: &str, dependencies: &mut Vec<DependencyReference>) {
    let mut parts = line.split_whitespace();
    let (Some(path), Some(version)) = (parts.next(), parts.next()) else {
        debug!("Skipping malformed require line: {}", line);
        return;
    };

    let is_version = version
        .strip_prefix('v')
        .and_then(|v| v.chars().next())
        .is_some_and(|c| c.is_ascii_digit());
    if !is_version {
        debug!("Skipping require line without a version: {}", line);
        return;
    }

    let dep = match vcs_root(path) {
        Some(root) => DependencyReference::new(root, version, OriginKind::VcsUrl)
            .with_locator(format!("https://{}", root)),
        None => DependencyReference::new(path, version, OriginKind::Unknown),
    };
    dependencies.push(dep);
}

/// Prefix of `path` up to a VCS qualifier that ends a path component.
pub fn vcs_root(path: &str) -> Option<&str> {
    let mut offset = 0;
    for component in path.split('/') {
        offset += component.len();
        if VCS_QUALIFIERS
            .iter()
            .any(|q| component.len() > q.len() && component.ends_with(q))
        {
            return Some(&path[..offset]);
        }
        offset += 1;
    }
    None
}

/// Content of a `go-import` meta tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoImport {
    pub root: String,
    pub vcs: String,
    pub repo_url: String,
}

/// Find the `go-import` meta tag anywhere in an HTML body.
pub fn extract_go_import(body: &str) -> Option<GoImport> {
    let caps = GO_IMPORT.captures(body)?;
    let mut fields = caps["content"].split_whitespace();
    Some(GoImport {
        root: fields.next()?.to_string(),
        vcs: fields.next()?.to_string(),
        repo_url: fields.next()?.to_string(),
    })
}

/// Resolves go.mod module paths to their repositories.
pub struct GoModuleLocator {
    client: Client,
    /// Replaces `https://` as the discovery origin. Used against local servers.
    discovery_base: Option<String>,
}

impl GoModuleLocator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery_base: None,
        }
    }

    pub fn with_discovery_base(mut self, base: impl Into<String>) -> Self {
        self.discovery_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn discovery_url(&self, module_path: &str) -> String {
        match &self.discovery_base {
            Some(base) => format!("{}/{}?go-get=1", base, module_path),
            None if module_path.contains("://") => format!("{}?go-get=1", module_path),
            None => format!("https://{}?go-get=1", module_path),
        }
    }

    /// Fill in the repository of an Unknown go reference.
    ///
    /// References of any other origin are returned untouched, as are those
    /// whose discovery request fails or returns no meta tag.
    pub async fn locate(&self, dep: DependencyReference) -> DependencyReference {
        if dep.origin != OriginKind::Unknown {
            return dep;
        }

        let url = self.discovery_url(&dep.name);
        debug!("Looking up go-import for {} at {}", dep.name, url);

        let body = match self.client.get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Cannot read discovery response for {}: {}", dep.name, e);
                    return dep;
                }
            },
            Err(e) => {
                warn!("Discovery request for {} failed: {}", dep.name, e);
                return dep;
            }
        };

        match extract_go_import(&body) {
            Some(import) => {
                debug!(
                    "Module {} lives in {} repository {}",
                    dep.name, import.vcs, import.repo_url
                );
                DependencyReference::new(import.root, dep.version_constraint, OriginKind::VcsUrl)
                    .with_locator(import.repo_url)
            }
            None => {
                debug!("No go-import meta tag for {}", dep.name);
                dep
            }
        }
    }
}
