//! DashMap-backed store with JSON snapshots.

use super::{LinkFilter, PackageFilter, Store};
use crate::types::{
    DependencyLink, ExplorationRecord, PackageIdentity, RepositoryInfo, RepositoryRecord,
    ResolvedPackage, Result, ScopeRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type LinkKey = (u64, String, String, String);

/// On-disk form of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    packages: Vec<ResolvedPackage>,
    #[serde(default)]
    scopes: Vec<ScopeRecord>,
    #[serde(default)]
    links: Vec<DependencyLink>,
    #[serde(default)]
    explorations: Vec<ExplorationRecord>,
    #[serde(default)]
    repositories: Vec<RepositoryRecord>,
    #[serde(default)]
    org_repositories: BTreeMap<String, Vec<String>>,
}

/// In-memory [`Store`], optionally backed by a JSON file.
///
/// Organisation and repository names are matched case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryStore {
    packages: DashMap<PackageIdentity, ResolvedPackage>,
    scopes: DashMap<(String, String), ScopeRecord>,
    links: DashMap<LinkKey, DependencyLink>,
    explorations: DashMap<String, ExplorationRecord>,
    repositories: DashMap<String, RepositoryRecord>,
    org_repositories: DashMap<String, Vec<String>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the snapshot at `path`; a missing file gives an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut store = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };

        if !path.exists() {
            debug!("No store snapshot at {:?}, starting empty", path);
            return Ok(store);
        }

        let snapshot: Snapshot = serde_json::from_str(&fs::read_to_string(path)?)?;
        store.restore(snapshot);
        info!(
            "Loaded store snapshot from {:?} ({} packages, {} repositories)",
            path,
            store.packages.len(),
            store.repositories.len()
        );

        Ok(store)
    }

    /// Write the snapshot back to the file the store was loaded from.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        debug!("Saved store snapshot to {:?}", path);
        Ok(())
    }

    fn restore(&mut self, snapshot: Snapshot) {
        for package in snapshot.packages {
            self.packages.insert(package.identity.clone(), package);
        }
        for scope in snapshot.scopes {
            self.scopes
                .insert((scope.name.clone(), scope.registry_host.clone()), scope);
        }
        for link in snapshot.links {
            self.links.insert(link.key(), link);
        }
        for record in snapshot.explorations {
            self.explorations.insert(record.name.to_lowercase(), record);
        }
        for record in snapshot.repositories {
            self.repositories
                .insert(record.repository.full_name.to_lowercase(), record);
        }
        for (org, repos) in snapshot.org_repositories {
            self.org_repositories.insert(org, repos);
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            packages: self.packages.iter().map(|e| e.value().clone()).collect(),
            scopes: self.scopes.iter().map(|e| e.value().clone()).collect(),
            links: self.links.iter().map(|e| e.value().clone()).collect(),
            explorations: self.explorations.iter().map(|e| e.value().clone()).collect(),
            repositories: self.repositories.iter().map(|e| e.value().clone()).collect(),
            org_repositories: self
                .org_repositories
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_package(&self, package: &ResolvedPackage) -> Result<()> {
        self.packages
            .insert(package.identity.clone(), package.clone());
        Ok(())
    }

    async fn get_package(&self, identity: &PackageIdentity) -> Result<Option<ResolvedPackage>> {
        Ok(self.packages.get(identity).map(|e| e.value().clone()))
    }

    async fn get_packages(&self, filter: &PackageFilter) -> Result<Vec<ResolvedPackage>> {
        let mut packages: Vec<_> = self
            .packages
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        packages.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(packages)
    }

    async fn upsert_scope(&self, scope: &ScopeRecord) -> Result<()> {
        self.scopes.insert(
            (scope.name.clone(), scope.registry_host.clone()),
            scope.clone(),
        );
        Ok(())
    }

    async fn get_scope(&self, name: &str, registry_host: &str) -> Result<Option<ScopeRecord>> {
        Ok(self
            .scopes
            .get(&(name.to_string(), registry_host.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn upsert_dependency_link(&self, link: &DependencyLink) -> Result<()> {
        self.links.insert(link.key(), link.clone());
        Ok(())
    }

    async fn find_dependency_links(&self, filter: &LinkFilter) -> Result<Vec<DependencyLink>> {
        Ok(self
            .links
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_exploration(&self, record: &ExplorationRecord) -> Result<()> {
        self.explorations
            .insert(record.name.to_lowercase(), record.clone());
        Ok(())
    }

    async fn get_exploration(&self, name: &str) -> Result<Option<ExplorationRecord>> {
        Ok(self
            .explorations
            .get(&name.to_lowercase())
            .map(|e| e.value().clone()))
    }

    async fn upsert_repositories(&self, org: Option<&str>, repositories: &[RepositoryInfo]) -> Result<()> {
        let now = Utc::now();
        for repository in repositories {
            self.repositories.insert(
                repository.full_name.to_lowercase(),
                RepositoryRecord {
                    repository: repository.clone(),
                    updated_at: now,
                },
            );
        }
        if let Some(org) = org {
            let names = repositories
                .iter()
                .map(|r| r.full_name.to_lowercase())
                .collect();
            self.org_repositories.insert(org.to_lowercase(), names);
        }
        Ok(())
    }

    async fn get_org_repositories(&self, org: &str) -> Result<Vec<RepositoryRecord>> {
        let Some(names) = self.org_repositories.get(&org.to_lowercase()) else {
            return Ok(Vec::new());
        };
        Ok(names
            .iter()
            .filter_map(|name| self.repositories.get(name).map(|e| e.value().clone()))
            .collect())
    }

    async fn get_repository(&self, full_name: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self
            .repositories
            .get(&full_name.to_lowercase())
            .map(|e| e.value().clone()))
    }
}
