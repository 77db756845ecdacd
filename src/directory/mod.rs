//! Repository discovery and manifest download.
//!
//! The scanner depends on [`RepositoryDirectory`] and [`SourceFetch`] only;
//! [`GithubDirectory`] implements both against the GitHub REST API.

mod github;

pub use github::{decode_contents, GithubDirectory, DEFAULT_API_BASE};

use crate::types::{ManifestFile, RepositoryInfo, Result};
use async_trait::async_trait;

/// Lists organisations' repositories and the manifest files they contain.
#[async_trait]
pub trait RepositoryDirectory: Send + Sync {
    /// Login of the authenticated user, `None` when running anonymously.
    async fn authenticate(&self) -> Result<Option<String>>;

    /// Repositories of `org`, `None` when the organisation does not exist.
    async fn list_org_repos(&self, org: &str) -> Result<Option<Vec<RepositoryInfo>>>;

    async fn get_repo(&self, full_name: &str) -> Result<Option<RepositoryInfo>>;

    /// Files called `file_name` anywhere in `repository`.
    async fn search_manifest_files(&self, repository: &str, file_name: &str) -> Result<Vec<ManifestFile>>;
}

/// Downloads the content of a manifest file.
#[async_trait]
pub trait SourceFetch: Send + Sync {
    async fn fetch_file_content(&self, url: &str) -> Result<String>;
}
