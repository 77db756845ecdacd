//! Persistence of everything the scanner learns.
//!
//! The scanner only talks to the [`Store`] trait. [`MemoryStore`] is the
//! implementation shipped with the CLI.

mod memory;

pub use memory::MemoryStore;

use crate::types::{
    DependencyLink, ExplorationRecord, PackageIdentity, RepositoryInfo, RepositoryRecord,
    ResolvedPackage, Result, ScopeRecord,
};
use async_trait::async_trait;

/// Selects packages in [`Store::get_packages`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub registry_host: Option<String>,
    pub present: Option<bool>,
}

impl PackageFilter {
    pub fn matches(&self, package: &ResolvedPackage) -> bool {
        self.registry_host
            .as_deref()
            .map_or(true, |h| h == package.identity.registry_host)
            && self.present.map_or(true, |p| p == package.present)
    }
}

/// Selects links in [`Store::find_dependency_links`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub repository_id: Option<u64>,
    pub package: Option<PackageIdentity>,
    pub manifest_path: Option<String>,
}

impl LinkFilter {
    pub fn matches(&self, link: &DependencyLink) -> bool {
        self.repository_id.map_or(true, |id| id == link.repository_id)
            && self.package.as_ref().map_or(true, |p| *p == link.package)
            && self
                .manifest_path
                .as_deref()
                .map_or(true, |m| m == link.manifest_path)
    }
}

/// Persistent store of packages, scopes, links and exploration bookkeeping.
///
/// Upserts are keyed by identity, so concurrent writes to different keys
/// never conflict and writes to the same key are last-writer-wins.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_package(&self, package: &ResolvedPackage) -> Result<()>;
    async fn get_package(&self, identity: &PackageIdentity) -> Result<Option<ResolvedPackage>>;
    async fn get_packages(&self, filter: &PackageFilter) -> Result<Vec<ResolvedPackage>>;

    async fn upsert_scope(&self, scope: &ScopeRecord) -> Result<()>;
    async fn get_scope(&self, name: &str, registry_host: &str) -> Result<Option<ScopeRecord>>;

    async fn upsert_dependency_link(&self, link: &DependencyLink) -> Result<()>;
    async fn find_dependency_links(&self, filter: &LinkFilter) -> Result<Vec<DependencyLink>>;

    async fn upsert_exploration(&self, record: &ExplorationRecord) -> Result<()>;
    async fn get_exploration(&self, name: &str) -> Result<Option<ExplorationRecord>>;

    /// Record repositories, optionally as the current listing of `org`.
    async fn upsert_repositories(&self, org: Option<&str>, repositories: &[RepositoryInfo]) -> Result<()>;
    async fn get_org_repositories(&self, org: &str) -> Result<Vec<RepositoryRecord>>;
    async fn get_repository(&self, full_name: &str) -> Result<Option<RepositoryRecord>>;
}
