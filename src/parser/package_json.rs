//! Parser for npm package.json manifests.

use crate::parser::classifier::{classify, Locator};
use crate::types::{DependencyReference, DepscanError, OriginKind, Result, ANY_VERSION};
use serde_json::Value;
use tracing::{debug, warn};

const SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Parse a package.json file.
///
/// Every value is routed through the classifier. Local paths and
/// unclassifiable values never leave this function.
pub fn parse(content: &str) -> Result<Vec<DependencyReference>> {
    let document: Value = serde_json::from_str(content).map_err(|e| DepscanError::ManifestParse {
        file: "package.json".to_string(),
        reason: e.to_string(),
    })?;

    let mut dependencies = Vec::new();

    for section in SECTIONS {
        let Some(entries) = document.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };

        for (name, value) in entries {
            let Some(value) = value.as_str() else {
                debug!("Skipping non-string value for {} in {}", name, section);
                continue;
            };

            if let Some(dep) = to_reference(name, value) {
                dependencies.push(dep);
            }
        }
    }

    Ok(dependencies)
}

fn to_reference(name: &str, value: &str) -> Option<DependencyReference> {
    match classify(value) {
        Locator::Version(range) => Some(DependencyReference::new(
            name,
            range,
            OriginKind::ExplicitVersion,
        )),
        Locator::Vcs { url, reference } => {
            Some(DependencyReference::new(name, reference, OriginKind::VcsUrl).with_locator(url))
        }
        Locator::Alias { target, range } => Some(
            DependencyReference::new(
                target,
                range.unwrap_or_else(|| ANY_VERSION.to_string()),
                OriginKind::Alias,
            )
            .with_locator(value),
        ),
        Locator::Tarball(url) => Some(
            DependencyReference::new(name, ANY_VERSION, OriginKind::TarballUrl).with_locator(url),
        ),
        Locator::LocalPath(path) => {
            debug!("Package {} with value {} looks like a local path. Ignoring it.", name, path);
            None
        }
        Locator::Unknown => {
            warn!("Unknown dependency value format for {}: {}", name, value);
            None
        }
    }
}
