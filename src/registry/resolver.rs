//! Registry probes with rate limiting and bounded retries.

use crate::freshness::FreshnessPolicy;
use crate::http::{backoff_delay, DirectLimiter};
use crate::registry::cache::ResolutionMemo;
use crate::store::Store;
use crate::types::{
    locator_url, DependencyReference, DepscanError, Ecosystem, PackageIdentity, ResolvedPackage,
    Result, ScopeRecord,
};
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Rate-limited answers tolerated before a probe fails.
pub const MAX_RETRIES: u32 = 5;
/// Consecutive transport failures tolerated before a probe fails.
pub const MAX_REQUEST_RETRIES: u32 = 5;
/// Versions kept in the `versions`/`releases` maps of stored metadata.
pub const KEEP_VERSIONS: usize = 30;

const ACCEPT_HEADER: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Base URLs of the registries, overridable per ecosystem.
#[derive(Debug, Clone)]
pub struct RegistryEndpoints {
    bases: HashMap<Ecosystem, String>,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            bases: Ecosystem::ALL
                .into_iter()
                .map(|e| (e, e.default_base_url().to_string()))
                .collect(),
        }
    }
}

impl RegistryEndpoints {
    pub fn with_base(mut self, ecosystem: Ecosystem, base: impl Into<String>) -> Self {
        self.bases
            .insert(ecosystem, base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn base(&self, ecosystem: Ecosystem) -> &str {
        self.bases
            .get(&ecosystem)
            .map(String::as_str)
            .unwrap_or_else(|| ecosystem.default_base_url())
    }

    /// By-name metadata URL of a package.
    pub fn package_url(&self, ecosystem: Ecosystem, name: &str) -> String {
        let base = self.base(ecosystem);
        match ecosystem {
            Ecosystem::PyPi => format!("{}/pypi/{}/json", base, name),
            Ecosystem::Npm => format!("{}/{}", base, name.replace('/', "%2F")),
            Ecosystem::RubyGems => format!("{}/api/v1/gems/{}.json", base, name),
            Ecosystem::Go => format!("{}/{}", base, name),
        }
    }

    /// URL answering whether an npm scope is owned.
    pub fn scope_url(&self, scope: &str) -> String {
        format!(
            "{}/-/org/{}/package",
            self.base(Ecosystem::Npm),
            urlencoding::encode(scope)
        )
    }
}

/// Retry bounds and backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Multiplied by the number of rate-limited answers so far.
    pub backoff_base: Duration,
    /// Pause after a transport failure.
    pub transport_delay: Duration,
    pub max_retries: u32,
    pub max_request_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(10),
            transport_delay: Duration::from_secs(1),
            max_retries: MAX_RETRIES,
            max_request_retries: MAX_REQUEST_RETRIES,
        }
    }
}

/// State shared by every resolution of a run.
#[derive(Clone)]
pub struct ResolutionContext {
    pub store: Arc<dyn Store>,
    pub memo: Arc<ResolutionMemo>,
    /// Ignore stored facts, however fresh.
    pub force: bool,
}

/// What to probe for one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub ecosystem: Ecosystem,
    pub identity: PackageIdentity,
    /// URL probed instead of the by-name endpoint.
    pub locator: Option<String>,
}

impl ProbeTarget {
    pub fn new(ecosystem: Ecosystem, dependency: &DependencyReference) -> Self {
        Self {
            ecosystem,
            identity: PackageIdentity::for_reference(dependency, ecosystem),
            locator: dependency.probe_locator().map(str::to_string),
        }
    }
}

#[derive(Debug)]
struct ProbeResponse {
    status: u16,
    content_type: String,
    body: String,
}

/// Resolves packages and npm scopes against the public registries.
pub struct RegistryResolver {
    client: Client,
    endpoints: RegistryEndpoints,
    rate_limiter: Arc<DirectLimiter>,
    retry: RetryPolicy,
    freshness: FreshnessPolicy,
}

impl RegistryResolver {
    pub fn new(
        client: Client,
        endpoints: RegistryEndpoints,
        rate_limiter: Arc<DirectLimiter>,
        retry: RetryPolicy,
        freshness: FreshnessPolicy,
    ) -> Self {
        Self {
            client,
            endpoints,
            rate_limiter,
            retry,
            freshness,
        }
    }

    pub fn endpoints(&self) -> &RegistryEndpoints {
        &self.endpoints
    }

    /// URL a target is probed at.
    pub fn probe_url(&self, target: &ProbeTarget) -> String {
        match target.locator.as_deref() {
            Some(locator) => locator_url(locator),
            None => self
                .endpoints
                .package_url(target.ecosystem, &target.identity.name),
        }
    }

    /// Probe a package (and its npm scope), then persist the answer.
    pub async fn resolve(&self, ctx: &ResolutionContext, target: &ProbeTarget) -> Result<ResolvedPackage> {
        if let Some(package) = ctx.memo.get_package(&target.identity) {
            trace!("Memo hit for {}", target.identity);
            return Ok(package);
        }

        let url = self.probe_url(target);
        let response = self.probe(Method::GET, &url).await?;
        let present = response.status == 200;

        let metadata = if present {
            Some(parse_metadata(&url, &response))
        } else {
            None
        };

        let scope = if target.ecosystem.is_namespace_scoped() {
            target.identity.scope().map(str::to_string)
        } else {
            None
        };
        let scope_response_code = match &scope {
            Some(scope) => Some(self.resolve_scope(ctx, scope).await?.response_code),
            None => None,
        };

        let package = ResolvedPackage {
            identity: target.identity.clone(),
            ecosystem: target.ecosystem,
            url,
            present,
            response_code: response.status,
            scope,
            scope_response_code,
            metadata,
            updated_at: Utc::now(),
        };

        debug!(
            "Resolved {} -> {} ({:?})",
            package.identity,
            package.response_code,
            package.outcome()
        );

        ctx.store.upsert_package(&package).await?;
        ctx.memo.set_package(package.clone());

        Ok(package)
    }

    /// Existence of an npm scope: memo, then a fresh stored record, then a
    /// HEAD probe of the org endpoint.
    pub async fn resolve_scope(&self, ctx: &ResolutionContext, scope: &str) -> Result<ScopeRecord> {
        let host = Ecosystem::Npm.registry_host();

        if let Some(record) = ctx.memo.get_scope(scope, host) {
            return Ok(record);
        }

        if !ctx.force {
            if let Some(record) = ctx.store.get_scope(scope, host).await? {
                if self.freshness.is_fresh(record.updated_at, Utc::now()) {
                    trace!("Scope {} served from the store", scope);
                    ctx.memo.set_scope(record.clone());
                    return Ok(record);
                }
            }
        }

        let url = self.endpoints.scope_url(scope);
        let response = self.probe(Method::HEAD, &url).await?;
        let record = ScopeRecord {
            name: scope.to_string(),
            registry_host: host.to_string(),
            present: response.status == 200,
            response_code: response.status,
            updated_at: Utc::now(),
        };
        debug!("Scope @{} -> {}", scope, record.response_code);

        ctx.store.upsert_scope(&record).await?;
        ctx.memo.set_scope(record.clone());

        Ok(record)
    }

    /// One request with rate limiting, transport retries and backoff on
    /// 403/429 answers.
    async fn probe(&self, method: Method, url: &str) -> Result<ProbeResponse> {
        let mut hits = 0u32;
        let mut failures = 0u32;

        loop {
            self.rate_limiter.until_ready().await;
            trace!("{} {}", method, url);

            let response = match self
                .client
                .request(method.clone(), url)
                .header(ACCEPT, ACCEPT_HEADER)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_builder() => {
                    error!("Cannot build a request for {}: {}", url, e);
                    return Err(e.into());
                }
                Err(e) => {
                    failures += 1;
                    warn!("Request to {} failed ({}/{}): {}", url, failures, self.retry.max_request_retries, e);
                    if failures >= self.retry.max_request_retries {
                        error!("Giving up on {} after {} transport failures", url, failures);
                        return Err(DepscanError::Transport {
                            url: url.to_string(),
                            attempts: failures,
                        });
                    }
                    tokio::time::sleep(self.retry.transport_delay).await;
                    continue;
                }
            };
            failures = 0;

            let status = response.status().as_u16();
            if status == 429 || status == 403 {
                hits += 1;
                if hits > self.retry.max_retries {
                    error!("Rate limited {} times by {}, giving up", hits, url);
                    return Err(DepscanError::RateLimited {
                        url: url.to_string(),
                        hits,
                    });
                }
                let delay = backoff_delay(self.retry.backoff_base, hits);
                info!("Got {} from {}, sleeping for {:?}", status, url, delay);
                tokio::time::sleep(delay).await;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = if method == Method::HEAD {
                String::new()
            } else {
                response.text().await.unwrap_or_default()
            };

            return Ok(ProbeResponse {
                status,
                content_type,
                body,
            });
        }
    }
}

fn parse_metadata(url: &str, response: &ProbeResponse) -> Value {
    if !response.content_type.contains("json") {
        return Value::String(response.body.clone());
    }
    match serde_json::from_str::<Value>(&response.body) {
        Ok(mut value) => {
            trim_versions(&mut value, KEEP_VERSIONS);
            value
        }
        Err(e) => {
            warn!("Cannot decode JSON metadata of {}: {}", url, e);
            Value::String(response.body.clone())
        }
    }
}

/// Keep only the `keep` most recent entries of `versions` and `releases`.
pub fn trim_versions(metadata: &mut Value, keep: usize) {
    for key in ["versions", "releases"] {
        let Some(Value::Object(map)) = metadata.get_mut(key) else {
            continue;
        };
        if map.len() <= keep {
            continue;
        }

        let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| compare_versions(b, a));
        entries.truncate(keep);
        *map = entries.into_iter().collect::<Map<String, Value>>();
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (version_key(a), version_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Semver reading of a version key. Partial versions such as `4.2` are
/// padded to three components; `rc1`-style suffixes become pre-releases and
/// `post1` suffixes sort after their release.
fn version_key(version: &str) -> Option<semver::Version> {
    let version = version.trim().trim_start_matches('v');
    if let Ok(parsed) = semver::Version::parse(version) {
        return Some(parsed);
    }

    let split = version
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(version.len());
    let (core, suffix) = version.split_at(split);
    let mut parts = core
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    parts.resize(3, 0);

    let mut parsed = semver::Version::new(parts[0], parts[1], parts[2]);
    let tag: String = suffix.chars().filter(char::is_ascii_alphanumeric).collect();
    if tag.starts_with("post") {
        parsed.build = semver::BuildMetadata::new(&tag).unwrap_or(semver::BuildMetadata::EMPTY);
    } else if !tag.is_empty() {
        parsed.pre = semver::Prerelease::new(&tag).unwrap_or(semver::Prerelease::EMPTY);
    }
    Some(parsed)
}
