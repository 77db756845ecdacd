//! Core types and errors for the dependency confusion scanner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during scanning.
#[derive(Error, Debug)]
pub enum DepscanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Transport failed {attempts} times for {url}")]
    Transport { url: String, attempts: u32 },

    #[error("Rate limited {hits} times by {url}")]
    RateLimited { url: String, hits: u32 },

    #[error("Unsupported manifest file: {0}")]
    UnsupportedManifest(String),

    #[error("Cannot parse manifest {file}: {reason}")]
    ManifestParse { file: String, reason: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Repository directory error: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),
}

pub type Result<T> = std::result::Result<T, DepscanError>;

/// Constraint recorded when a manifest names a dependency without a version.
pub const ANY_VERSION: &str = "any";

/// Public package registries the scanner knows how to probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    PyPi,
    Npm,
    RubyGems,
    Go,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 4] = [
        Ecosystem::PyPi,
        Ecosystem::Npm,
        Ecosystem::RubyGems,
        Ecosystem::Go,
    ];

    /// Key used in the settings file tables.
    pub fn key(&self) -> &'static str {
        match self {
            Ecosystem::PyPi => "pypi",
            Ecosystem::Npm => "npm",
            Ecosystem::RubyGems => "rubygems",
            Ecosystem::Go => "go",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Host recorded in every [`PackageIdentity`] of this ecosystem.
    pub fn registry_host(&self) -> &'static str {
        match self {
            Ecosystem::PyPi => "pypi.org",
            Ecosystem::Npm => "registry.npmjs.org",
            Ecosystem::RubyGems => "rubygems.org",
            Ecosystem::Go => "pkg.go.dev",
        }
    }

    /// Default base URL of the public registry.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Ecosystem::PyPi => "https://pypi.org",
            Ecosystem::Npm => "https://registry.npmjs.org",
            Ecosystem::RubyGems => "https://rubygems.org",
            Ecosystem::Go => "https://pkg.go.dev",
        }
    }

    /// Whether package names may carry an independently owned `@scope/`.
    pub fn is_namespace_scoped(&self) -> bool {
        matches!(self, Ecosystem::Npm)
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How a dependency value locates its package.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OriginKind {
    /// A version or version range resolved against the public registry.
    ExplicitVersion,
    /// A VCS repository (git URL, GitHub shorthand).
    VcsUrl,
    /// `npm:` alias for another registry package.
    Alias,
    /// Remote tarball URL.
    TarballUrl,
    /// Local filesystem path; never resolved.
    LocalPath,
    /// Value that could not be classified.
    Unknown,
}

/// A dependency declared in a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyReference {
    /// Package name as it would be published.
    pub name: String,
    /// Version constraint, [`ANY_VERSION`] when the manifest gives none.
    pub version_constraint: String,
    /// Kind of value the manifest used.
    pub origin: OriginKind,
    /// URL or path the manifest points at, if any.
    pub locator: Option<String>,
}

impl DependencyReference {
    pub fn new(name: impl Into<String>, version_constraint: impl Into<String>, origin: OriginKind) -> Self {
        let version_constraint = version_constraint.into();
        Self {
            name: name.into(),
            version_constraint: if version_constraint.trim().is_empty() {
                ANY_VERSION.to_string()
            } else {
                version_constraint
            },
            origin,
            locator: None,
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    /// URL to probe instead of the registry's by-name endpoint.
    ///
    /// Aliases carry their `npm:` spec as locator but are resolved by name.
    pub fn probe_locator(&self) -> Option<&str> {
        match self.origin {
            OriginKind::Alias | OriginKind::LocalPath | OriginKind::Unknown => None,
            _ => self.locator.as_deref().filter(|l| !l.is_empty()),
        }
    }
}

/// Absolute URL of a probe locator.
///
/// Scheme-less locators get `https://`; scp-style `user@host:path` becomes
/// `https://host/path`.
pub fn locator_url(locator: &str) -> String {
    if locator.contains("://") {
        return locator.to_string();
    }
    if let Some((user_host, path)) = locator.split_once(':') {
        if let Some((_, host)) = user_host.split_once('@') {
            if !host.is_empty() && !host.contains('/') && !path.starts_with(|c: char| c.is_ascii_digit()) {
                return format!("https://{}/{}", host, path.trim_start_matches('/'));
            }
        }
    }
    format!("https://{}", locator)
}

/// Uniqueness key for everything cached or persisted about a package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity {
    pub name: String,
    pub registry_host: String,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, ecosystem: Ecosystem) -> Self {
        Self {
            name: name.into(),
            registry_host: ecosystem.registry_host().to_string(),
        }
    }

    /// Identity a dependency is resolved under.
    ///
    /// A dependency probed through a locator belongs to the locator's host
    /// (with its port), so a git repository or tarball never shares a record
    /// with the registry package of the same name.
    pub fn for_reference(dependency: &DependencyReference, ecosystem: Ecosystem) -> Self {
        let host = dependency
            .probe_locator()
            .and_then(|locator| url::Url::parse(&locator_url(locator)).ok())
            .and_then(|url| {
                let host = url.host_str()?.to_lowercase();
                Some(match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                })
            });

        match host {
            Some(registry_host) => Self {
                name: dependency.name.clone(),
                registry_host,
            },
            None => Self::new(&dependency.name, ecosystem),
        }
    }

    /// Scope of an npm-style `@scope/name`, without the `@`.
    pub fn scope(&self) -> Option<&str> {
        let rest = self.name.strip_prefix('@')?;
        let (scope, package) = rest.split_once('/')?;
        if scope.is_empty() || package.is_empty() {
            return None;
        }
        Some(scope)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.registry_host)
    }
}

/// Registry facts about a package, upserted by identity on every resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedPackage {
    pub identity: PackageIdentity,
    pub ecosystem: Ecosystem,
    /// URL that was probed.
    pub url: String,
    pub present: bool,
    /// HTTP status of the probe, 0 when the package was recorded unprobed.
    pub response_code: u16,
    pub scope: Option<String>,
    pub scope_response_code: Option<u16>,
    /// Registry payload; version maps trimmed, non-JSON bodies as a string.
    pub metadata: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl ResolvedPackage {
    /// Record for a dependency whose location could not be determined.
    pub fn unresolved(identity: PackageIdentity, ecosystem: Ecosystem) -> Self {
        Self {
            identity,
            ecosystem,
            url: String::new(),
            present: false,
            response_code: 0,
            scope: None,
            scope_response_code: None,
            metadata: None,
            updated_at: Utc::now(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::classify(self.response_code, self.scope.as_deref(), self.scope_response_code)
    }
}

/// Existence of an npm scope (organisation or user namespace).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeRecord {
    pub name: String,
    pub registry_host: String,
    pub present: bool,
    pub response_code: u16,
    pub updated_at: DateTime<Utc>,
}

/// Hijackability of a package, derived from its probe results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The package is published.
    ConfirmedExisting,
    /// The package is missing but its scope is owned by someone.
    ConfirmedNamespaceOccupied,
    /// Nothing stops a third party from publishing under this name.
    PotentiallyHijackable,
    /// The probe did not give a usable answer.
    Indeterminate,
}

impl Outcome {
    pub fn classify(response_code: u16, scope: Option<&str>, scope_response_code: Option<u16>) -> Self {
        let scoped = scope.is_some_and(|s| !s.is_empty());
        match response_code {
            404 if !scoped || scope_response_code == Some(404) => Outcome::PotentiallyHijackable,
            404 if scope_response_code == Some(200) => Outcome::ConfirmedNamespaceOccupied,
            200 => Outcome::ConfirmedExisting,
            _ => Outcome::Indeterminate,
        }
    }
}

/// Edge between a repository manifest and a package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyLink {
    pub repository_id: u64,
    pub repository_name: String,
    pub package: PackageIdentity,
    pub manifest_path: String,
    pub version_constraint: String,
    pub updated_at: DateTime<Utc>,
}

impl DependencyLink {
    /// Idempotency key of the link.
    pub fn key(&self) -> (u64, String, String, String) {
        (
            self.repository_id,
            self.package.name.clone(),
            self.manifest_path.clone(),
            self.version_constraint.clone(),
        )
    }
}

/// Repository metadata as returned by the repository directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub id: u64,
    pub full_name: String,
    pub language: Option<String>,
    #[serde(alias = "stargazers_count", default)]
    pub star_count: u64,
}

impl RepositoryInfo {
    /// Owner part of `owner/name`.
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or_default()
    }
}

/// Cached repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub repository: RepositoryInfo,
    pub updated_at: DateTime<Utc>,
}

/// Bookkeeping for an explored organisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplorationRecord {
    pub name: String,
    pub repo_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A manifest file found in a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    /// Where the content can be fetched from.
    pub url: String,
}

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational only.
    Info,
    /// Low severity.
    Low,
    /// High severity (confirmed missing package).
    High,
    /// Critical (scoped package with unclaimed scope).
    Critical,
}

impl Severity {
    pub fn for_outcome(outcome: Outcome, scoped: bool) -> Self {
        match outcome {
            Outcome::PotentiallyHijackable if scoped => Severity::Critical,
            Outcome::PotentiallyHijackable => Severity::High,
            Outcome::Indeterminate => Severity::Low,
            Outcome::ConfirmedExisting | Outcome::ConfirmedNamespaceOccupied => Severity::Info,
        }
    }
}

/// One reported outcome for one dependency of one repository manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub package: String,
    pub registry: String,
    pub version_constraint: String,
    pub repository: String,
    pub stars: u64,
    pub manifest_path: String,
    pub url: String,
    pub response_code: u16,
    pub scope: Option<String>,
    pub scope_response_code: Option<u16>,
    pub outcome: Outcome,
    pub severity: Severity,
    /// Answer came from the local store instead of the network.
    pub cached: bool,
}

impl Finding {
    pub fn is_hijackable(&self) -> bool {
        self.outcome == Outcome::PotentiallyHijackable
    }
}

/// Scan result for one repository.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoryReport {
    pub repository: String,
    pub manifests_scanned: usize,
    pub dependencies: usize,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
    pub duration_secs: f64,
}

/// Complete result of a run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub repositories: Vec<RepositoryReport>,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn hijackable_count(&self) -> usize {
        self.repositories
            .iter()
            .flat_map(|r| r.findings.iter())
            .filter(|f| f.is_hijackable())
            .count()
    }
}

/// Progress of the repository loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((processed.min(total) * 100) / total) as u8
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}
