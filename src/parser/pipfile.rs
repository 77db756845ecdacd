//! Parser for Pipfile-style TOML manifests.

use crate::types::{DependencyReference, DepscanError, OriginKind, Result, ANY_VERSION};
use tracing::debug;

const SECTIONS: &[&str] = &["packages", "dev-packages"];

/// Parse a Pipfile.
///
/// A value is either a version string or a table whose `version`, `git` and
/// `path` keys populate the constraint and locator. Path dependencies are
/// dropped.
pub fn parse(content: &str) -> Result<Vec<DependencyReference>> {
    let document: toml::Table = content.parse().map_err(|e: toml::de::Error| DepscanError::ManifestParse {
        file: "Pipfile".to_string(),
        reason: e.to_string(),
    })?;

    let mut dependencies = Vec::new();

    for section in SECTIONS {
        let Some(table) = document.get(*section).and_then(|v| v.as_table()) else {
            continue;
        };

        for (name, value) in table {
            match parse_entry(name, value) {
                Some(dep) if dep.origin == OriginKind::LocalPath => {
                    debug!("Ignoring local path dependency {} in [{}]", name, section);
                }
                Some(dep) => dependencies.push(dep),
                None => debug!("Skipping unsupported value for {} in [{}]", name, section),
            }
        }
    }

    Ok(dependencies)
}

fn parse_entry(name: &str, value: &toml::Value) -> Option<DependencyReference> {
    match value {
        toml::Value::String(version) => Some(DependencyReference::new(
            name,
            version.as_str(),
            OriginKind::ExplicitVersion,
        )),
        toml::Value::Table(details) => {
            let version = details
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or(ANY_VERSION);

            if let Some(path) = details.get("path").and_then(|v| v.as_str()) {
                return Some(
                    DependencyReference::new(name, version, OriginKind::LocalPath).with_locator(path),
                );
            }
            if let Some(git) = details.get("git").and_then(|v| v.as_str()) {
                let reference = details
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .unwrap_or(version);
                return Some(
                    DependencyReference::new(name, reference, OriginKind::VcsUrl).with_locator(git),
                );
            }

            Some(DependencyReference::new(name, version, OriginKind::ExplicitVersion))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipfile() {
        let content = r#"
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[packages]
requests = "*"
django = ">=4.2"
internal-lib = { git = "https://github.com/acme/internal-lib.git", ref = "v2" }
local-lib = { path = "./libs/local" }
pinned = { version = "==1.0.0", extras = ["fast"] }

[dev-packages]
pytest = "~=7.0"
weird = 42
"#;
        let deps = parse(content).unwrap();
        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["django", "internal-lib", "pinned", "requests", "pytest"]
        );

        let git = deps.iter().find(|d| d.name == "internal-lib").unwrap();
        assert_eq!(git.origin, OriginKind::VcsUrl);
        assert_eq!(git.version_constraint, "v2");
        assert_eq!(
            git.locator.as_deref(),
            Some("https://github.com/acme/internal-lib.git")
        );

        let pinned = deps.iter().find(|d| d.name == "pinned").unwrap();
        assert_eq!(pinned.version_constraint, "==1.0.0");

        let requests = deps.iter().find(|d| d.name == "requests").unwrap();
        assert_eq!(requests.version_constraint, "*");
    }

    #[test]
    fn test_invalid_toml_fails_the_file() {
        assert!(matches!(
            parse("[packages\nrequests = "),
            Err(DepscanError::ManifestParse { .. })
        ));
    }
}
