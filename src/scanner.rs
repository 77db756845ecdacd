//! Main scanner orchestrating all components.

use crate::directory::{RepositoryDirectory, SourceFetch};
use crate::freshness::FreshnessPolicy;
use crate::notify::{format_finding_message, ConsoleOutput, Notifier, FINDING_TITLE};
use crate::parser::{manifest_kind, parse_manifest, GoModuleLocator, ManifestKind};
use crate::registry::{ProbeTarget, RegistryResolver, ResolutionContext, ResolutionMemo};
use crate::store::{LinkFilter, PackageFilter, Store};
use crate::types::{
    DependencyLink, DependencyReference, DepscanError, Ecosystem, ExplorationRecord, Finding,
    ManifestFile, OriginKind, Outcome, PackageIdentity, Progress, RepositoryInfo,
    RepositoryReport, ResolvedPackage, Result, RunSummary, Severity,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

const START_TITLE: &str = "🎬 Starting scan 🎬";
const EXPLORE_TITLE: &str = "🔍 Repositories to explore 🔍";
const FINISH_TITLE: &str = "🏁 Scan finished 🏁";

/// What a run scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Organisations(Vec<String>),
    Repositories(Vec<String>),
    /// Domains stand for the organisation named by their leading label.
    Domains(Vec<String>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Organisations(t) | Targets::Repositories(t) | Targets::Domains(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Targets::Organisations(_) => "organisations",
            Targets::Repositories(_) => "repositories",
            Targets::Domains(_) => "domains",
        }
    }

    /// Organisation names to list, deduplicated case-insensitively.
    fn organisations(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            Targets::Organisations(orgs) => orgs.clone(),
            Targets::Domains(domains) => domains.iter().filter_map(|d| domain_label(d)).collect(),
            Targets::Repositories(_) => Vec::new(),
        };

        let mut seen = HashSet::new();
        names
            .into_iter()
            .filter(|n| seen.insert(n.to_lowercase()))
            .collect()
    }
}

/// Leading label of a domain, e.g. `acme` for `acme.com`.
pub fn domain_label(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return None;
    }
    let url = if domain.contains("://") {
        Url::parse(domain)
    } else {
        Url::parse(&format!("https://{}", domain))
    }
    .ok()?;

    let label = url.host_str()?.split('.').next()?;
    (!label.is_empty()).then(|| label.to_string())
}

/// Which repositories are scanned and which manifests are searched.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Repository language, lowercase, to the registry its packages come from.
    pub languages: HashMap<String, Ecosystem>,
    /// Manifest file names searched for each registry.
    pub manifests: HashMap<Ecosystem, Vec<String>>,
    pub min_stars: u64,
    pub force: bool,
    pub freshness: FreshnessPolicy,
}

impl ScanSettings {
    pub fn ecosystem_for(&self, language: Option<&str>) -> Option<Ecosystem> {
        self.languages.get(&language?.to_lowercase()).copied()
    }

    pub fn manifest_names(&self, ecosystem: Ecosystem) -> &[String] {
        self.manifests
            .get(&ecosystem)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        let languages = [
            ("python", Ecosystem::PyPi),
            ("javascript", Ecosystem::Npm),
            ("typescript", Ecosystem::Npm),
            ("ruby", Ecosystem::RubyGems),
            ("go", Ecosystem::Go),
        ]
        .into_iter()
        .map(|(l, e)| (l.to_string(), e))
        .collect();

        let manifests = [
            (Ecosystem::PyPi, vec!["requirements.txt", "Pipfile", "poetry.toml"]),
            (Ecosystem::Npm, vec!["package.json"]),
            (Ecosystem::RubyGems, vec!["Gemfile"]),
            (Ecosystem::Go, vec!["go.mod"]),
        ]
        .into_iter()
        .map(|(e, names)| (e, names.into_iter().map(str::to_string).collect()))
        .collect();

        Self {
            languages,
            manifests,
            min_stars: 0,
            force: false,
            freshness: FreshnessPolicy::default(),
        }
    }
}

/// Where the answer for one dependency comes from.
enum Triage {
    /// Linked before and known recently enough.
    Cached(ResolvedPackage),
    /// Module location unknown, recorded without a probe.
    Unresolved(ResolvedPackage),
    Queued,
}

/// Main scanner that orchestrates all scanning components.
pub struct Scanner {
    directory: Arc<dyn RepositoryDirectory>,
    source: Arc<dyn SourceFetch>,
    store: Arc<dyn Store>,
    resolver: Arc<RegistryResolver>,
    go_locator: GoModuleLocator,
    memo: Arc<ResolutionMemo>,
    notifiers: Vec<Arc<dyn Notifier>>,
    console: ConsoleOutput,
    settings: ScanSettings,
    stop: Arc<AtomicBool>,
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl Scanner {
    pub fn new(
        directory: Arc<dyn RepositoryDirectory>,
        source: Arc<dyn SourceFetch>,
        store: Arc<dyn Store>,
        resolver: RegistryResolver,
        go_locator: GoModuleLocator,
        settings: ScanSettings,
    ) -> Self {
        Self {
            directory,
            source,
            store,
            resolver: Arc::new(resolver),
            go_locator,
            memo: Arc::new(ResolutionMemo::default()),
            notifiers: Vec::new(),
            console: ConsoleOutput::default(),
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            processed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    pub fn with_memo(mut self, memo: ResolutionMemo) -> Self {
        self.memo = Arc::new(memo);
        self
    }

    pub fn with_console(mut self, console: ConsoleOutput) -> Self {
        self.console = console;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Flag that, once set, stops the run before the next repository.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Repositories scanned so far in the current run.
    pub fn progress(&self) -> Progress {
        Progress::new(
            self.processed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    fn context(&self) -> ResolutionContext {
        ResolutionContext {
            store: Arc::clone(&self.store),
            memo: Arc::clone(&self.memo),
            force: self.settings.force,
        }
    }

    /// Scan every repository the targets lead to.
    pub async fn run(&self, targets: &Targets) -> Result<RunSummary> {
        let start_time = Instant::now();

        let login = self.directory.authenticate().await.map_err(|e| match e {
            DepscanError::Authentication(_) => e,
            other => DepscanError::Authentication(other.to_string()),
        })?;
        if let Some(login) = login {
            debug!("Directory session opened as {}", login);
        }

        self.ping(
            &format!(
                "Starting scan of {} {} at {}",
                targets.len(),
                targets.kind(),
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            START_TITLE,
        )
        .await;

        let repositories = self.prepare(targets).await;
        self.ping(
            &format!(
                "Found {} repositories to explore from the list of {} {}",
                repositories.len(),
                targets.len(),
                targets.kind()
            ),
            EXPLORE_TITLE,
        )
        .await;

        self.total.store(repositories.len(), Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.console.print_scan_start(repositories.len(), "repositories");

        let mut reports = Vec::with_capacity(repositories.len());
        for (index, repository) in repositories.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                warn!(
                    "Stop requested, {} repositories left unscanned",
                    repositories.len() - index
                );
                break;
            }

            self.console
                .print_repository(index + 1, repositories.len(), repository);
            let report = self.scan_repository(repository).await;
            self.console.print_report(&report);
            reports.push(report);

            self.processed.fetch_add(1, Ordering::SeqCst);
            let progress = self.progress();
            debug!(
                "Progress: {}/{} ({}%)",
                progress.processed, progress.total, progress.percentage
            );
        }

        let summary = RunSummary {
            repositories: reports,
            duration_secs: start_time.elapsed().as_secs_f64(),
        };

        self.ping(
            &format!(
                "Scanned {} repositories in {:.0}s, {} potentially hijackable dependencies",
                summary.repositories.len(),
                summary.duration_secs,
                summary.hijackable_count()
            ),
            FINISH_TITLE,
        )
        .await;
        self.console.print_summary(&summary);

        Ok(summary)
    }

    /// Resolve targets into the repositories to scan.
    async fn prepare(&self, targets: &Targets) -> Vec<RepositoryInfo> {
        let mut repositories = Vec::new();

        match targets {
            Targets::Repositories(names) => {
                for name in names {
                    match self.prepare_repository(name).await {
                        Ok(Some(repository)) => repositories.push(repository),
                        Ok(None) => warn!("Repository {} not found", name),
                        Err(e) => error!("Cannot prepare repository {}: {}", name, e),
                    }
                }
            }
            Targets::Organisations(_) | Targets::Domains(_) => {
                let organisations = targets.organisations();
                for (index, org) in organisations.iter().enumerate() {
                    match self.prepare_organisation(org).await {
                        Ok(repos) => {
                            info!(
                                "Organisation #{}/{}: {} has {} repositories",
                                index + 1,
                                organisations.len(),
                                org,
                                repos.len()
                            );
                            repositories.extend(repos);
                        }
                        Err(e) => error!("Cannot prepare organisation {}: {}", org, e),
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        repositories.retain(|r| seen.insert(r.full_name.to_lowercase()));
        repositories
    }

    async fn prepare_organisation(&self, org: &str) -> Result<Vec<RepositoryInfo>> {
        let record = self.store.get_exploration(org).await?;
        if !self
            .settings
            .freshness
            .should_refetch_org(record.as_ref(), self.settings.force)
        {
            debug!("Using stored repositories of {}", org);
            let stored = self.store.get_org_repositories(org).await?;
            return Ok(stored.into_iter().map(|r| r.repository).collect());
        }

        let repositories = match self.directory.list_org_repos(org).await? {
            Some(repositories) => repositories,
            None => {
                warn!("Organisation {} does not exist", org);
                Vec::new()
            }
        };

        self.store
            .upsert_repositories(Some(org), &repositories)
            .await?;
        self.store
            .upsert_exploration(&ExplorationRecord {
                name: org.to_string(),
                repo_count: repositories.len(),
                updated_at: Utc::now(),
            })
            .await?;

        Ok(repositories)
    }

    async fn prepare_repository(&self, full_name: &str) -> Result<Option<RepositoryInfo>> {
        let record = self.store.get_repository(full_name).await?;
        if let Some(record) = record.filter(|r| {
            !self
                .settings
                .freshness
                .should_refetch_repo(Some(r), self.settings.force)
        }) {
            debug!("Using stored metadata of {}", full_name);
            return Ok(Some(record.repository));
        }

        let repository = self.directory.get_repo(full_name).await?;
        if let Some(ref repository) = repository {
            self.store
                .upsert_repositories(None, std::slice::from_ref(repository))
                .await?;
        }
        Ok(repository)
    }

    /// Scan every manifest of one repository.
    pub async fn scan_repository(&self, repository: &RepositoryInfo) -> RepositoryReport {
        let start_time = Instant::now();
        let mut report = RepositoryReport {
            repository: repository.full_name.clone(),
            ..RepositoryReport::default()
        };

        let Some(ecosystem) = self.settings.ecosystem_for(repository.language.as_deref()) else {
            info!(
                "Skipping {}: language {} is not covered",
                repository.full_name,
                repository.language.as_deref().unwrap_or("unknown")
            );
            return report;
        };
        if repository.star_count < self.settings.min_stars {
            info!(
                "Skipping {}: {} stars, fewer than {}",
                repository.full_name, repository.star_count, self.settings.min_stars
            );
            return report;
        }

        let mut seen = HashSet::new();
        for file_name in self.settings.manifest_names(ecosystem) {
            let files = match self
                .directory
                .search_manifest_files(&repository.full_name, file_name)
                .await
            {
                Ok(files) => files,
                Err(e) => {
                    warn!("Search for {} in {} failed: {}", file_name, repository.full_name, e);
                    report.errors.push(format!("search {}: {}", file_name, e));
                    continue;
                }
            };

            for file in files {
                if manifest_kind(&file.name).is_none() || !seen.insert(file.path.clone()) {
                    debug!("Ignoring {} in {}", file.path, repository.full_name);
                    continue;
                }

                match self.scan_manifest(repository, &file, &mut report).await {
                    Ok(()) => report.manifests_scanned += 1,
                    Err(e) => {
                        warn!("Cannot scan {} of {}: {}", file.path, repository.full_name, e);
                        report.errors.push(format!("{}: {}", file.path, e));
                    }
                }
            }
        }

        report.duration_secs = start_time.elapsed().as_secs_f64();
        report
    }

    async fn scan_manifest(
        &self,
        repository: &RepositoryInfo,
        file: &ManifestFile,
        report: &mut RepositoryReport,
    ) -> Result<()> {
        let kind = manifest_kind(&file.name)
            .ok_or_else(|| DepscanError::UnsupportedManifest(file.name.clone()))?;
        let ecosystem = kind.ecosystem();

        let content = self.source.fetch_file_content(&file.url).await?;
        let references = parse_manifest(&file.name, &content)?;
        debug!(
            "{} declares {} dependencies in {}",
            repository.full_name,
            references.len(),
            file.path
        );
        report.dependencies += references.len();

        let mut queued = Vec::new();
        for reference in references {
            let reference = if kind == ManifestKind::GoMod {
                self.go_locator.locate(reference).await
            } else {
                reference
            };

            match self
                .classify_or_queue(repository, &file.path, ecosystem, &reference)
                .await
            {
                Ok(Triage::Cached(package)) => {
                    let finding = self.finding(repository, &file.path, &reference, &package, true);
                    if finding.is_hijackable() {
                        self.report_finding(&finding).await;
                        report.findings.push(finding);
                    } else {
                        debug!("{} unchanged since {}", package.identity, package.updated_at);
                    }
                }
                Ok(Triage::Unresolved(package)) => {
                    let finding = self.finding(repository, &file.path, &reference, &package, false);
                    self.report_finding(&finding).await;
                    report.findings.push(finding);
                }
                Ok(Triage::Queued) => queued.push(reference),
                Err(e) => {
                    warn!("Cannot look up {} in the store: {}", reference.name, e);
                    report.errors.push(format!("{}: {}", reference.name, e));
                }
            }
        }

        if queued.is_empty() {
            debug!("Every dependency of {} answered from the store", file.path);
            return Ok(());
        }

        for (reference, result) in self.resolve_batch(ecosystem, queued).await {
            let package = match result {
                Ok(package) => package,
                Err(e) => {
                    warn!("Resolution of {} failed: {}", reference.name, e);
                    report.errors.push(format!("{}: {}", reference.name, e));
                    let target = ProbeTarget::new(ecosystem, &reference);
                    let mut package = ResolvedPackage::unresolved(target.identity.clone(), ecosystem);
                    package.url = self.resolver.probe_url(&target);
                    package
                }
            };

            let finding = self.finding(repository, &file.path, &reference, &package, false);
            self.report_finding(&finding).await;
            report.findings.push(finding);
        }

        Ok(())
    }

    /// Link the dependency and decide whether it needs a registry probe.
    async fn classify_or_queue(
        &self,
        repository: &RepositoryInfo,
        manifest_path: &str,
        ecosystem: Ecosystem,
        reference: &DependencyReference,
    ) -> Result<Triage> {
        let identity = PackageIdentity::for_reference(reference, ecosystem);
        let linked = !self
            .store
            .find_dependency_links(&LinkFilter {
                repository_id: Some(repository.id),
                package: Some(identity.clone()),
                manifest_path: Some(manifest_path.to_string()),
            })
            .await?
            .is_empty();

        self.store
            .upsert_dependency_link(&DependencyLink {
                repository_id: repository.id,
                repository_name: repository.full_name.clone(),
                package: identity.clone(),
                manifest_path: manifest_path.to_string(),
                version_constraint: reference.version_constraint.clone(),
                updated_at: Utc::now(),
            })
            .await?;

        if reference.origin == OriginKind::Unknown {
            let package = ResolvedPackage::unresolved(identity, ecosystem);
            self.store.upsert_package(&package).await?;
            return Ok(Triage::Unresolved(package));
        }

        if linked {
            let stored = self.store.get_package(&identity).await?;
            if let Some(package) = stored.filter(|p| {
                !self
                    .settings
                    .freshness
                    .should_re_resolve(Some(p), self.settings.force)
            }) {
                return Ok(Triage::Cached(package));
            }
        }

        Ok(Triage::Queued)
    }

    /// Resolve one manifest's queued references, one task each.
    async fn resolve_batch(
        &self,
        ecosystem: Ecosystem,
        queued: Vec<DependencyReference>,
    ) -> Vec<(DependencyReference, Result<ResolvedPackage>)> {
        let pb = self
            .console
            .create_progress_bar(queued.len() as u64, "Resolving packages");

        let handles: Vec<_> = queued
            .iter()
            .map(|reference| {
                let resolver = Arc::clone(&self.resolver);
                let ctx = self.context();
                let target = ProbeTarget::new(ecosystem, reference);
                let pb = pb.clone();
                tokio::spawn(async move {
                    let result = resolver.resolve(&ctx, &target).await;
                    if let Some(pb) = pb {
                        pb.inc(1);
                    }
                    result
                })
            })
            .collect();

        let results = queued
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(reference, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    Err(DepscanError::Directory(format!("resolution task failed: {}", e)))
                });
                (reference, result)
            })
            .collect();

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        results
    }

    fn finding(
        &self,
        repository: &RepositoryInfo,
        manifest_path: &str,
        reference: &DependencyReference,
        package: &ResolvedPackage,
        cached: bool,
    ) -> Finding {
        let outcome = package.outcome();
        Finding {
            package: package.identity.name.clone(),
            registry: package.identity.registry_host.clone(),
            version_constraint: reference.version_constraint.clone(),
            repository: repository.full_name.clone(),
            stars: repository.star_count,
            manifest_path: manifest_path.to_string(),
            url: package.url.clone(),
            response_code: package.response_code,
            scope: package.scope.clone(),
            scope_response_code: package.scope_response_code,
            outcome,
            severity: Severity::for_outcome(outcome, package.scope.is_some()),
            cached,
        }
    }

    async fn report_finding(&self, finding: &Finding) {
        self.console.print_finding(finding);

        let source = if finding.cached { "local" } else { "remote" };
        match finding.outcome {
            Outcome::PotentiallyHijackable => info!(
                "[+] {} ({}) in {} {} is potentially hijackable [{} {}] ({})",
                finding.package,
                finding.version_constraint,
                finding.repository,
                finding.manifest_path,
                finding.url,
                finding.response_code,
                source
            ),
            Outcome::ConfirmedExisting | Outcome::ConfirmedNamespaceOccupied => debug!(
                "[-] {} ({}) in {} {} exists [{} {}] ({})",
                finding.package,
                finding.version_constraint,
                finding.repository,
                finding.manifest_path,
                finding.url,
                finding.response_code,
                source
            ),
            Outcome::Indeterminate => warn!(
                "[?] {} ({}) in {} {} could not be resolved [{} {}]",
                finding.package,
                finding.version_constraint,
                finding.repository,
                finding.manifest_path,
                finding.url,
                finding.response_code
            ),
        }

        if finding.is_hijackable() {
            self.ping(&format_finding_message(finding), FINDING_TITLE).await;
        }
    }

    async fn ping(&self, message: &str, title: &str) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.ping(message, title).await {
                warn!("Notification failed: {}", e);
            }
        }
    }
}

/// Potentially hijackable dependencies recorded in the store.
pub async fn stored_findings(store: &dyn Store) -> Result<Vec<Finding>> {
    let missing = store
        .get_packages(&PackageFilter {
            present: Some(false),
            ..PackageFilter::default()
        })
        .await?;

    let mut findings = Vec::new();
    for package in missing
        .into_iter()
        .filter(|p| p.outcome() == Outcome::PotentiallyHijackable)
    {
        let links = store
            .find_dependency_links(&LinkFilter {
                package: Some(package.identity.clone()),
                ..LinkFilter::default()
            })
            .await?;

        for link in links {
            let stars = store
                .get_repository(&link.repository_name)
                .await?
                .map_or(0, |r| r.repository.star_count);
            let outcome = package.outcome();
            findings.push(Finding {
                package: package.identity.name.clone(),
                registry: package.identity.registry_host.clone(),
                version_constraint: link.version_constraint,
                repository: link.repository_name,
                stars,
                manifest_path: link.manifest_path,
                url: package.url.clone(),
                response_code: package.response_code,
                scope: package.scope.clone(),
                scope_response_code: package.scope_response_code,
                outcome,
                severity: Severity::for_outcome(outcome, package.scope.is_some()),
                cached: true,
            });
        }
    }

    findings.sort_by(|a, b| (&a.repository, &a.package).cmp(&(&b.repository, &b.package)));
    Ok(findings)
}
