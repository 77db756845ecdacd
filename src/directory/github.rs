//! GitHub REST API directory.

use super::{RepositoryDirectory, SourceFetch};
use crate::http::backoff_delay;
use crate::registry::RetryPolicy;
use crate::types::{DepscanError, ManifestFile, RepositoryInfo, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const PER_PAGE: usize = 100;

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct CodeSearch {
    #[serde(default)]
    items: Vec<ManifestFile>,
}

/// [`RepositoryDirectory`] and [`SourceFetch`] over the GitHub API.
pub struct GithubDirectory {
    client: Client,
    api_base: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GithubDirectory {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.filter(|t| !t.is_empty()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url).header(ACCEPT, GITHUB_ACCEPT);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }

    /// GET `url`, sleeping linearly longer after every 403/429.
    async fn get(&self, url: &str) -> Result<Response> {
        let mut hits = 0;
        loop {
            let response = self.request(url).send().await?;
            let status = response.status();
            if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            hits += 1;
            if hits > self.retry.max_retries {
                return Err(DepscanError::RateLimited {
                    url: url.to_string(),
                    hits,
                });
            }
            let delay = backoff_delay(self.retry.backoff_base, hits);
            warn!("GitHub answered {} for {}, sleeping {:?}", status, url, delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn unexpected(url: &str, status: StatusCode) -> DepscanError {
        DepscanError::Directory(format!("{} returned {}", url, status))
    }
}

#[async_trait]
impl RepositoryDirectory for GithubDirectory {
    async fn authenticate(&self) -> Result<Option<String>> {
        if self.token.is_none() {
            warn!("No GitHub token configured, code search will be unavailable");
            return Ok(None);
        }

        let url = format!("{}/user", self.api_base);
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(DepscanError::Authentication(format!(
                "GitHub answered {}",
                response.status()
            )));
        }

        let user: User = response
            .json()
            .await
            .map_err(|e| DepscanError::Authentication(e.to_string()))?;
        info!("Authenticated on GitHub as {}", user.login);
        Ok(Some(user.login))
    }

    async fn list_org_repos(&self, org: &str) -> Result<Option<Vec<RepositoryInfo>>> {
        let mut repositories = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/orgs/{}/repos?per_page={}&page={}",
                self.api_base,
                urlencoding::encode(org),
                PER_PAGE,
                page
            );
            let response = self.get(&url).await?;
            match response.status() {
                StatusCode::NOT_FOUND => {
                    debug!("Organisation {} not found", org);
                    return Ok(None);
                }
                status if !status.is_success() => return Err(Self::unexpected(&url, status)),
                _ => {}
            }

            let batch: Vec<RepositoryInfo> = response.json().await?;
            let done = batch.len() < PER_PAGE;
            repositories.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        debug!("Organisation {} has {} repositories", org, repositories.len());
        Ok(Some(repositories))
    }

    async fn get_repo(&self, full_name: &str) -> Result<Option<RepositoryInfo>> {
        let url = format!("{}/repos/{}", self.api_base, full_name);
        let response = self.get(&url).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(Self::unexpected(&url, status)),
            _ => Ok(Some(response.json().await?)),
        }
    }

    async fn search_manifest_files(&self, repository: &str, file_name: &str) -> Result<Vec<ManifestFile>> {
        let url = format!(
            "{}/search/code?q=filename:{}+repo:{}",
            self.api_base,
            urlencoding::encode(file_name),
            repository
        );
        let response = self.get(&url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(&url, status));
        }

        let search: CodeSearch = response.json().await?;
        Ok(search.items)
    }
}

#[async_trait]
impl SourceFetch for GithubDirectory {
    async fn fetch_file_content(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(url, status));
        }
        decode_contents(&response.text().await?)
    }
}

/// Unwrap a contents API envelope; anything else is returned as is.
pub fn decode_contents(body: &str) -> Result<String> {
    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(body) else {
        return Ok(body.to_string());
    };
    let Some(content) = envelope.get("content").and_then(Value::as_str) else {
        return Ok(body.to_string());
    };

    match envelope.get("encoding").and_then(Value::as_str) {
        Some("base64") | None => {
            let compact: String = content.split_whitespace().collect();
            let bytes = STANDARD.decode(compact)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some(_) => Ok(content.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn directory(server: &MockServer, token: Option<&str>) -> GithubDirectory {
        GithubDirectory::new(Client::new(), token.map(str::to_string))
            .with_api_base(server.uri())
            .with_retry(RetryPolicy {
                backoff_base: Duration::from_millis(1),
                ..RetryPolicy::default()
            })
    }

    fn repo_json(id: u64) -> Value {
        json!({
            "id": id,
            "full_name": format!("acme/repo-{}", id),
            "language": "Python",
            "stargazers_count": id
        })
    }

    #[test]
    fn test_decode_contents() {
        let body = json!({ "content": "cmVxdWVz\ndHM9PTIu\nMAo=\n", "encoding": "base64" }).to_string();
        assert_eq!(decode_contents(&body).unwrap(), "requests==2.0\n");
        assert_eq!(decode_contents("flask\n").unwrap(), "flask\n");
        assert_eq!(decode_contents(r#"{"name": "web"}"#).unwrap(), r#"{"name": "web"}"#);
    }

    #[tokio::test]
    async fn test_authenticate_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "token ghp_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "login": "octocat" })))
            .mount(&server)
            .await;

        let login = directory(&server, Some("ghp_test")).authenticate().await.unwrap();
        assert_eq!(login.as_deref(), Some("octocat"));
        assert_eq!(directory(&server, None).authenticate().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = directory(&server, Some("bad")).authenticate().await;
        assert!(matches!(result, Err(DepscanError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_list_org_repos_paginates() {
        let server = MockServer::start().await;
        let first: Vec<_> = (1..=100).map(repo_json).collect();
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![repo_json(101)]))
            .mount(&server)
            .await;

        let repos = directory(&server, None).list_org_repos("acme").await.unwrap().unwrap();
        assert_eq!(repos.len(), 101);
        assert_eq!(repos[100].star_count, 101);
        assert_eq!(repos[0].owner(), "acme");
    }

    #[tokio::test]
    async fn test_missing_org_and_repo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let directory = directory(&server, None);
        assert!(directory.list_org_repos("ghost").await.unwrap().is_none());
        assert!(directory.get_repo("ghost/repo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_backs_off_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(query_param("q", "filename:package.json repo:acme/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "items": [
                    { "name": "package.json", "path": "package.json", "url": "https://api.github.com/x" },
                    { "name": "my-package.json", "path": "cfg/my-package.json", "url": "https://api.github.com/y" }
                ]
            })))
            .mount(&server)
            .await;

        let files = directory(&server, Some("t"))
            .search_manifest_files("acme/web", "package.json")
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "package.json");
        assert_eq!(files[1].name, "my-package.json");
    }

    #[tokio::test]
    async fn test_search_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(6)
            .mount(&server)
            .await;

        let result = directory(&server, Some("t"))
            .search_manifest_files("acme/web", "go.mod")
            .await;
        assert!(matches!(result, Err(DepscanError::RateLimited { hits: 6, .. })));
    }

    #[tokio::test]
    async fn test_fetch_file_content_decodes_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/contents/go.mod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": STANDARD.encode("module example.com/web\n"),
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let content = directory(&server, None)
            .fetch_file_content(&format!("{}/repos/acme/web/contents/go.mod", server.uri()))
            .await
            .unwrap();
        assert_eq!(content, "module example.com/web\n");
    }
}
