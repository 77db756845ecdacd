//! Manifest parsers.
//!
//! This module turns manifest files into [`DependencyReference`]s:
//! - pip requirements files
//! - Pipfile / poetry TOML
//! - npm package.json (values go through the [`classifier`])
//! - go.mod (module paths resolved later by [`GoModuleLocator`])
//! - Bundler Gemfiles

pub mod classifier;
pub mod gemfile;
pub mod gomod;
pub mod package_json;
pub mod pipfile;
pub mod requirements;

pub use classifier::{classify, Locator};
pub use gomod::GoModuleLocator;

use crate::types::{DependencyReference, DepscanError, Ecosystem, OriginKind, Result};
use tracing::debug;

/// Kind of manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    Requirements,
    Pipfile,
    PackageJson,
    GoMod,
    Gemfile,
}

impl ManifestKind {
    /// Registry the dependencies of this manifest are published to.
    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            ManifestKind::Requirements | ManifestKind::Pipfile => Ecosystem::PyPi,
            ManifestKind::PackageJson => Ecosystem::Npm,
            ManifestKind::GoMod => Ecosystem::Go,
            ManifestKind::Gemfile => Ecosystem::RubyGems,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FilePattern {
    Suffix(&'static str),
    Exact(&'static str),
}

impl FilePattern {
    fn matches(&self, file_name: &str) -> bool {
        match self {
            FilePattern::Suffix(suffix) => file_name.ends_with(suffix),
            FilePattern::Exact(name) => file_name == *name,
        }
    }
}

type ParseFn = fn(&str) -> Result<Vec<DependencyReference>>;

struct ManifestRule {
    pattern: FilePattern,
    kind: ManifestKind,
    parse: ParseFn,
}

/// File name dispatch. The first matching row wins.
static MANIFEST_TABLE: &[ManifestRule] = &[
    ManifestRule {
        pattern: FilePattern::Suffix("requirements.txt"),
        kind: ManifestKind::Requirements,
        parse: parse_requirements,
    },
    ManifestRule {
        pattern: FilePattern::Suffix("Pipfile"),
        kind: ManifestKind::Pipfile,
        parse: pipfile::parse,
    },
    ManifestRule {
        pattern: FilePattern::Suffix("poetry.toml"),
        kind: ManifestKind::Pipfile,
        parse: pipfile::parse,
    },
    ManifestRule {
        pattern: FilePattern::Exact("package.json"),
        kind: ManifestKind::PackageJson,
        parse: package_json::parse,
    },
    ManifestRule {
        pattern: FilePattern::Suffix("Gemfile"),
        kind: ManifestKind::Gemfile,
        parse: gemfile::parse,
    },
    ManifestRule {
        pattern: FilePattern::Exact("go.mod"),
        kind: ManifestKind::GoMod,
        parse: gomod::parse,
    },
];

fn parse_requirements(content: &str) -> Result<Vec<DependencyReference>> {
    Ok(requirements::parse(content))
}

fn base_name(file_name: &str) -> &str {
    file_name.rsplit('/').next().unwrap_or(file_name)
}

/// Kind of a manifest file, by name. Directories in the name are ignored.
pub fn manifest_kind(file_name: &str) -> Option<ManifestKind> {
    let name = base_name(file_name);
    MANIFEST_TABLE
        .iter()
        .find(|rule| rule.pattern.matches(name))
        .map(|rule| rule.kind)
}

/// Parse a manifest file into its dependencies.
///
/// Malformed entries are skipped; the file only fails when it cannot be
/// decoded at all. Local path dependencies are never returned.
pub fn parse_manifest(file_name: &str, content: &str) -> Result<Vec<DependencyReference>> {
    let name = base_name(file_name);
    let rule = MANIFEST_TABLE
        .iter()
        .find(|rule| rule.pattern.matches(name))
        .ok_or_else(|| DepscanError::UnsupportedManifest(file_name.to_string()))?;

    let dependencies = (rule.parse)(content).map_err(|e| match e {
        DepscanError::ManifestParse { reason, .. } => DepscanError::ManifestParse {
            file: file_name.to_string(),
            reason,
        },
        other => other,
    })?;

    let dependencies: Vec<_> = dependencies
        .into_iter()
        .filter(|dep| {
            if dep.origin == OriginKind::LocalPath {
                debug!("Dropping local path dependency {} from {}", dep.name, file_name);
                return false;
            }
            !dep.name.trim().is_empty()
        })
        .collect();

    debug!(
        "Parsed {} dependencies from {} ({:?})",
        dependencies.len(),
        file_name,
        rule.kind
    );

    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_name() {
        assert_eq!(manifest_kind("requirements.txt"), Some(ManifestKind::Requirements));
        assert_eq!(manifest_kind("dev-requirements.txt"), Some(ManifestKind::Requirements));
        assert_eq!(manifest_kind("Pipfile"), Some(ManifestKind::Pipfile));
        assert_eq!(manifest_kind("poetry.toml"), Some(ManifestKind::Pipfile));
        assert_eq!(manifest_kind("web/package.json"), Some(ManifestKind::PackageJson));
        assert_eq!(manifest_kind("Gemfile"), Some(ManifestKind::Gemfile));
        assert_eq!(manifest_kind("go.mod"), Some(ManifestKind::GoMod));
        assert_eq!(manifest_kind("my-package.json"), None);
        assert_eq!(manifest_kind("Cargo.toml"), None);
    }

    #[test]
    fn test_unsupported_manifest() {
        assert!(matches!(
            parse_manifest("Cargo.toml", "[package]"),
            Err(DepscanError::UnsupportedManifest(_))
        ));
    }

    #[test]
    fn test_parse_error_names_the_file() {
        match parse_manifest("frontend/package.json", "{") {
            Err(DepscanError::ManifestParse { file, .. }) => {
                assert_eq!(file, "frontend/package.json")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_local_paths_never_escape() {
        let deps = parse_manifest(
            "requirements.txt",
            "local @ file:///opt/src/local\nrequests==2.31.0\n",
        )
        .unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "requests");
    }

    #[test]
    fn test_ecosystems() {
        assert_eq!(ManifestKind::Pipfile.ecosystem(), Ecosystem::PyPi);
        assert_eq!(ManifestKind::PackageJson.ecosystem(), Ecosystem::Npm);
        assert_eq!(ManifestKind::GoMod.ecosystem(), Ecosystem::Go);
        assert_eq!(ManifestKind::Gemfile.ecosystem(), Ecosystem::RubyGems);
    }
}
