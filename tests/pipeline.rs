//! End-to-end scans against fake directories and mock registries.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use depscan::directory::{RepositoryDirectory, SourceFetch};
use depscan::freshness::FreshnessPolicy;
use depscan::http::rate_limiter;
use depscan::notify::Notifier;
use depscan::parser::GoModuleLocator;
use depscan::registry::{RegistryEndpoints, RegistryResolver, RetryPolicy};
use depscan::scanner::{ScanSettings, Scanner, Targets};
use depscan::store::{MemoryStore, Store};
use depscan::types::{
    DependencyLink, ManifestFile, RepositoryInfo, Severity,
};
use depscan::{DepscanError, Ecosystem, Outcome, PackageIdentity, ResolvedPackage, Result};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakeDirectory {
    orgs: HashMap<String, Vec<RepositoryInfo>>,
    /// `repo:file_name` to search hits.
    files: HashMap<String, Vec<ManifestFile>>,
    /// Manifest URL to content.
    contents: HashMap<String, String>,
    reject_auth: bool,
    org_listings: AtomicUsize,
}

impl FakeDirectory {
    fn with_manifest(mut self, repository: &str, file_path: &str, content: &str) -> Self {
        let name = file_path.rsplit('/').next().unwrap_or(file_path).to_string();
        let url = format!("fake://{}/{}", repository, file_path);
        self.files
            .entry(format!("{}:{}", repository, name))
            .or_default()
            .push(ManifestFile {
                name,
                path: file_path.to_string(),
                url: url.clone(),
            });
        self.contents.insert(url, content.to_string());
        self
    }
}

#[async_trait]
impl RepositoryDirectory for FakeDirectory {
    async fn authenticate(&self) -> Result<Option<String>> {
        if self.reject_auth {
            return Err(DepscanError::Authentication("bad credentials".to_string()));
        }
        Ok(Some("tester".to_string()))
    }

    async fn list_org_repos(&self, org: &str) -> Result<Option<Vec<RepositoryInfo>>> {
        self.org_listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.orgs.get(org).cloned())
    }

    async fn get_repo(&self, full_name: &str) -> Result<Option<RepositoryInfo>> {
        Ok(self
            .orgs
            .values()
            .flatten()
            .find(|r| r.full_name == full_name)
            .cloned())
    }

    async fn search_manifest_files(&self, repository: &str, file_name: &str) -> Result<Vec<ManifestFile>> {
        Ok(self
            .files
            .get(&format!("{}:{}", repository, file_name))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceFetch for FakeDirectory {
    async fn fetch_file_content(&self, url: &str) -> Result<String> {
        self.contents
            .get(url)
            .cloned()
            .ok_or_else(|| DepscanError::Directory(format!("{} not found", url)))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    titles: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn ping(&self, _message: &str, title: &str) -> Result<()> {
        self.titles.lock().unwrap().push(title.to_string());
        Ok(())
    }
}

fn repository(id: u64, full_name: &str, language: &str, stars: u64) -> RepositoryInfo {
    RepositoryInfo {
        id,
        full_name: full_name.to_string(),
        language: Some(language.to_string()),
        star_count: stars,
    }
}

fn scanner(
    server: &MockServer,
    directory: Arc<FakeDirectory>,
    store: Arc<MemoryStore>,
    settings: ScanSettings,
) -> Scanner {
    let endpoints = Ecosystem::ALL
        .into_iter()
        .fold(RegistryEndpoints::default(), |e, eco| e.with_base(eco, server.uri()));
    let resolver = RegistryResolver::new(
        Client::new(),
        endpoints,
        rate_limiter(1000),
        RetryPolicy {
            backoff_base: Duration::from_millis(1),
            transport_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        },
        settings.freshness,
    );
    let go_locator = GoModuleLocator::new(Client::new()).with_discovery_base(server.uri());

    Scanner::new(directory.clone(), directory, store, resolver, go_locator, settings)
}

#[tokio::test]
async fn test_npm_existing_and_hijackable_scope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lodash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "lodash",
            "versions": { "4.17.21": {} }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/@acme%2Fsdk"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/-/org/acme/package"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut directory = FakeDirectory::default().with_manifest(
        "acme/web",
        "package.json",
        r#"{ "dependencies": { "lodash": "^4.17.21", "@acme/sdk": "^1.0.0", "local": "file:../local" } }"#,
    );
    directory
        .orgs
        .insert("acme".to_string(), vec![repository(1, "acme/web", "JavaScript", 120)]);

    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let scanner = scanner(&server, Arc::new(directory), store.clone(), ScanSettings::default())
        .with_notifier(notifier.clone());

    let summary = scanner
        .run(&Targets::Organisations(vec!["acme".to_string()]))
        .await
        .unwrap();

    assert_eq!(summary.repositories.len(), 1);
    let report = &summary.repositories[0];
    assert_eq!(report.manifests_scanned, 1);
    assert_eq!(report.dependencies, 2);
    assert!(report.errors.is_empty());

    let lodash = report.findings.iter().find(|f| f.package == "lodash").unwrap();
    assert_eq!(lodash.outcome, Outcome::ConfirmedExisting);
    assert_eq!(lodash.severity, Severity::Info);

    let sdk = report.findings.iter().find(|f| f.package == "@acme/sdk").unwrap();
    assert_eq!(sdk.outcome, Outcome::PotentiallyHijackable);
    assert_eq!(sdk.severity, Severity::Critical);
    assert_eq!(sdk.scope.as_deref(), Some("acme"));
    assert_eq!(sdk.scope_response_code, Some(404));
    assert!(!sdk.cached);
    assert_eq!(summary.hijackable_count(), 1);

    let stored = store
        .get_package(&PackageIdentity::new("@acme/sdk", Ecosystem::Npm))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.response_code, 404);
    assert!(store.get_scope("acme", "registry.npmjs.org").await.unwrap().is_some());

    let titles = notifier.titles.lock().unwrap().clone();
    assert_eq!(titles.len(), 4);
    assert_eq!(titles[0], "🎬 Starting scan 🎬");
    assert_eq!(titles[1], "🔍 Repositories to explore 🔍");
    assert_eq!(titles[2], depscan::notify::FINDING_TITLE);
    assert_eq!(titles[3], "🏁 Scan finished 🏁");

    assert_eq!(scanner.progress().percentage, 100);
}

#[tokio::test]
async fn test_unlocatable_go_module_is_indeterminate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/example.com/foo"))
        .and(query_param("go-get", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><head></head></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let mut directory = FakeDirectory::default().with_manifest(
        "acme/svc",
        "go.mod",
        "module example.com/svc\n\nrequire example.com/foo v1.2.3\n",
    );
    directory
        .orgs
        .insert("acme".to_string(), vec![repository(2, "acme/svc", "Go", 5)]);

    let store = Arc::new(MemoryStore::new());
    let scanner = scanner(&server, Arc::new(directory), store.clone(), ScanSettings::default());
    let summary = scanner
        .run(&Targets::Repositories(vec!["acme/svc".to_string()]))
        .await
        .unwrap();

    let findings = &summary.repositories[0].findings;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].package, "example.com/foo");
    assert_eq!(findings[0].outcome, Outcome::Indeterminate);
    assert_eq!(findings[0].response_code, 0);

    let stored = store
        .get_package(&PackageIdentity::new("example.com/foo", Ecosystem::Go))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.response_code, 0);
}

#[tokio::test]
async fn test_fresh_cached_package_is_reported_without_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/leftpad/json"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repository(3, "acme/api", "Python", 10);
    let store = Arc::new(MemoryStore::new());
    let identity = PackageIdentity::new("leftpad", Ecosystem::PyPi);
    let mut package = ResolvedPackage::unresolved(identity.clone(), Ecosystem::PyPi);
    package.url = format!("{}/pypi/leftpad/json", server.uri());
    package.response_code = 404;
    package.updated_at = Utc::now() - ChronoDuration::hours(3);
    store.upsert_package(&package).await.unwrap();
    store
        .upsert_dependency_link(&DependencyLink {
            repository_id: repo.id,
            repository_name: repo.full_name.clone(),
            package: identity,
            manifest_path: "requirements.txt".to_string(),
            version_constraint: "==1.0".to_string(),
            updated_at: Utc::now() - ChronoDuration::hours(3),
        })
        .await
        .unwrap();

    let mut directory =
        FakeDirectory::default().with_manifest("acme/api", "requirements.txt", "leftpad==1.0\n");
    directory.orgs.insert("acme".to_string(), vec![repo]);

    let settings = ScanSettings {
        freshness: FreshnessPolicy::from_hours(6),
        ..ScanSettings::default()
    };
    let scanner = scanner(&server, Arc::new(directory), store, settings);
    let summary = scanner
        .run(&Targets::Organisations(vec!["acme".to_string()]))
        .await
        .unwrap();

    let findings = &summary.repositories[0].findings;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].package, "leftpad");
    assert_eq!(findings[0].outcome, Outcome::PotentiallyHijackable);
    assert_eq!(findings[0].severity, Severity::High);
    assert!(findings[0].cached);
}

#[tokio::test]
async fn test_force_re_resolves_cached_package() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/leftpad/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "info": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = repository(3, "acme/api", "Python", 10);
    let store = Arc::new(MemoryStore::new());
    let identity = PackageIdentity::new("leftpad", Ecosystem::PyPi);
    let mut package = ResolvedPackage::unresolved(identity.clone(), Ecosystem::PyPi);
    package.response_code = 404;
    store.upsert_package(&package).await.unwrap();
    store
        .upsert_dependency_link(&DependencyLink {
            repository_id: repo.id,
            repository_name: repo.full_name.clone(),
            package: identity,
            manifest_path: "requirements.txt".to_string(),
            version_constraint: "any".to_string(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut directory =
        FakeDirectory::default().with_manifest("acme/api", "requirements.txt", "leftpad\n");
    directory.orgs.insert("acme".to_string(), vec![repo]);

    let settings = ScanSettings {
        force: true,
        ..ScanSettings::default()
    };
    let summary = scanner(&server, Arc::new(directory), store, settings)
        .run(&Targets::Repositories(vec!["acme/api".to_string()]))
        .await
        .unwrap();

    let findings = &summary.repositories[0].findings;
    assert_eq!(findings[0].outcome, Outcome::ConfirmedExisting);
    assert!(!findings[0].cached);
}

#[tokio::test]
async fn test_fresh_organisation_is_not_listed_again() {
    let server = MockServer::start().await;
    let mut directory = FakeDirectory::default();
    directory
        .orgs
        .insert("acme".to_string(), vec![repository(4, "acme/docs", "Haskell", 1)]);
    let directory = Arc::new(directory);
    let store = Arc::new(MemoryStore::new());
    let targets = Targets::Domains(vec!["acme.com".to_string()]);

    let first = scanner(&server, directory.clone(), store.clone(), ScanSettings::default())
        .run(&targets)
        .await
        .unwrap();
    let second = scanner(&server, directory.clone(), store.clone(), ScanSettings::default())
        .run(&targets)
        .await
        .unwrap();

    assert_eq!(directory.org_listings.load(Ordering::SeqCst), 1);
    assert_eq!(first.repositories.len(), 1);
    assert_eq!(second.repositories.len(), 1);
    // Language not covered: nothing searched.
    assert_eq!(second.repositories[0].manifests_scanned, 0);
}

#[tokio::test]
async fn test_repositories_below_minimum_stars_are_skipped() {
    let server = MockServer::start().await;
    let mut directory =
        FakeDirectory::default().with_manifest("acme/tiny", "requirements.txt", "leftpad\n");
    directory
        .orgs
        .insert("acme".to_string(), vec![repository(5, "acme/tiny", "Python", 2)]);

    let settings = ScanSettings {
        min_stars: 10,
        ..ScanSettings::default()
    };
    let summary = scanner(&server, Arc::new(directory), Arc::new(MemoryStore::new()), settings)
        .run(&Targets::Organisations(vec!["acme".to_string()]))
        .await
        .unwrap();

    assert_eq!(summary.repositories[0].dependencies, 0);
    assert!(summary.repositories[0].findings.is_empty());
}

#[tokio::test]
async fn test_failed_resolution_is_indeterminate_and_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/busy/json"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pypi/acme-tools/json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut directory = FakeDirectory::default().with_manifest(
        "acme/api",
        "requirements.txt",
        "busy==1.0\nacme-tools>=2\n",
    );
    directory
        .orgs
        .insert("acme".to_string(), vec![repository(6, "acme/api", "Python", 10)]);

    let summary = scanner(
        &server,
        Arc::new(directory),
        Arc::new(MemoryStore::new()),
        ScanSettings::default(),
    )
    .run(&Targets::Repositories(vec!["acme/api".to_string()]))
    .await
    .unwrap();

    let report = &summary.repositories[0];
    assert_eq!(report.errors.len(), 1);
    let busy = report.findings.iter().find(|f| f.package == "busy").unwrap();
    assert_eq!(busy.outcome, Outcome::Indeterminate);
    let tools = report.findings.iter().find(|f| f.package == "acme-tools").unwrap();
    assert_eq!(tools.outcome, Outcome::PotentiallyHijackable);
}

#[tokio::test]
async fn test_authentication_failure_aborts_run() {
    let server = MockServer::start().await;
    let directory = FakeDirectory {
        reject_auth: true,
        ..FakeDirectory::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());

    let result = scanner(
        &server,
        Arc::new(directory),
        Arc::new(MemoryStore::new()),
        ScanSettings::default(),
    )
    .with_notifier(notifier.clone())
    .run(&Targets::Organisations(vec!["acme".to_string()]))
    .await;

    assert!(matches!(result, Err(DepscanError::Authentication(_))));
    assert!(notifier.titles.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_flag_prevents_next_repository() {
    let server = MockServer::start().await;
    let mut directory = FakeDirectory::default();
    directory.orgs.insert(
        "acme".to_string(),
        vec![
            repository(7, "acme/a", "Python", 1),
            repository(8, "acme/b", "Python", 1),
        ],
    );

    let scanner = scanner(
        &server,
        Arc::new(directory),
        Arc::new(MemoryStore::new()),
        ScanSettings::default(),
    );
    scanner.stop_flag().store(true, Ordering::SeqCst);

    let summary = scanner
        .run(&Targets::Organisations(vec!["acme".to_string()]))
        .await
        .unwrap();
    assert!(summary.repositories.is_empty());
    assert_eq!(scanner.progress().total, 2);
    assert_eq!(scanner.progress().processed, 0);
}
