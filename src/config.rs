//! Configuration handling for the scanner.

use crate::freshness::{FreshnessPolicy, DEFAULT_REFRESH_HOURS, MAX_REFRESH_HOURS};
use crate::http::HttpConfig;
use crate::parser::manifest_kind;
use crate::registry::{RegistryEndpoints, ResolutionMemo, RetryPolicy, MAX_TTL};
use crate::scanner::{ScanSettings, Targets};
use crate::types::{DepscanError, Ecosystem, Result};
use clap::{ArgGroup, Parser, Subcommand};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest accepted backoff base, one hour.
const MAX_BACKOFF_SECS: u64 = 3600;

static ORGANISATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));
static REPOSITORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+/[A-Za-z0-9_.-]+$").expect("valid regex"));

/// Dependency confusion scanner for GitHub organisations and repositories.
#[derive(Parser, Debug, Clone)]
#[command(name = "depscan")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Scan organisations, repositories or domains for orphan dependencies
    Scan(ScanConfig),
    /// List potentially hijackable dependencies recorded by earlier scans
    Findings(FindingsConfig),
}

/// Configuration for the scan command.
#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("targets").required(true).args(["orgs", "repos", "domains"])))]
pub struct ScanConfig {
    /// File with one GitHub organisation per line
    #[arg(long, value_name = "FILE")]
    pub orgs: Option<PathBuf>,

    /// File with one `owner/name` repository per line
    #[arg(long, value_name = "FILE")]
    pub repos: Option<PathBuf>,

    /// File with one domain per line, scanned as the organisation of its first label
    #[arg(long, value_name = "FILE")]
    pub domains: Option<PathBuf>,

    /// Minimum number of stars a repository needs to be scanned
    #[arg(long, default_value = "0")]
    pub stars: u64,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Proxy for every request, e.g. http://127.0.0.1:8080
    #[arg(long)]
    pub proxy: Option<String>,

    /// Ignore cached data, however fresh
    #[arg(long)]
    pub force: bool,

    /// Settings file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Store snapshot (defaults to the user data directory)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the JSON results to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Quiet mode: only show repositories with findings
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Enable Telegram notifications for findings
    #[arg(long)]
    pub telegram: bool,

    /// Telegram bot token for notifications
    #[arg(long, env = "DEPSCAN_TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Telegram chat ID for notifications
    #[arg(long, env = "DEPSCAN_TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Discord webhook URL for notifications
    #[arg(long, env = "DEPSCAN_DISCORD_WEBHOOK", hide_env_values = true)]
    pub discord_webhook: Option<String>,
}

impl ScanConfig {
    /// Load targets from whichever target file was given.
    pub fn load_targets(&self) -> Result<Targets> {
        if let Some(ref path) = self.orgs {
            let orgs = read_target_lines(path)?
                .into_iter()
                .filter(|line| keep_valid(line, is_valid_organisation, "organisation"))
                .collect();
            return Ok(Targets::Organisations(orgs));
        }
        if let Some(ref path) = self.repos {
            let repos = read_target_lines(path)?
                .into_iter()
                .filter(|line| keep_valid(line, is_valid_repository, "repository"))
                .collect();
            return Ok(Targets::Repositories(repos));
        }
        if let Some(ref path) = self.domains {
            return Ok(Targets::Domains(read_target_lines(path)?));
        }

        Err(DepscanError::ConfigError(
            "one of --orgs, --repos or --domains is required".to_string(),
        ))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(default_store_path)
    }
}

/// Configuration for the findings command.
#[derive(Parser, Debug, Clone)]
pub struct FindingsConfig {
    /// Store snapshot (defaults to the user data directory)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl FindingsConfig {
    pub fn store_path(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(default_store_path)
    }
}

/// `<data dir>/depscan/store.json`, or the working directory without one.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depscan")
        .join("store.json")
}

pub fn is_valid_organisation(name: &str) -> bool {
    ORGANISATION.is_match(name)
}

pub fn is_valid_repository(name: &str) -> bool {
    REPOSITORY.is_match(name)
}

fn keep_valid(line: &str, valid: fn(&str) -> bool, kind: &str) -> bool {
    let ok = valid(line);
    if !ok {
        warn!("Skipping invalid {} '{}'", kind, line);
    }
    ok
}

/// Non-empty lines of a target file, `#` comments skipped.
fn read_target_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Settings file contents. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// GitHub API base URL.
    pub api_base: String,
    pub refresh_hours: i64,
    pub backoff_base_secs: u64,
    pub request_timeout_secs: u64,
    /// Registry requests per second.
    pub rate_limit: u32,
    pub memo_capacity: usize,
    pub memo_ttl_secs: u64,
    /// Repository language to registry key; replaces the built-in table.
    pub languages: Option<BTreeMap<String, String>>,
    /// Registry key to manifest file names; replaces the built-in table.
    pub manifests: Option<BTreeMap<String, Vec<String>>>,
    /// Registry key to base URL.
    pub registries: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: crate::directory::DEFAULT_API_BASE.to_string(),
            refresh_hours: DEFAULT_REFRESH_HOURS,
            backoff_base_secs: 10,
            request_timeout_secs: 10,
            rate_limit: 10,
            memo_capacity: 1024,
            memo_ttl_secs: 3600,
            languages: None,
            manifests: None,
            registries: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Read the settings file, or the defaults when none is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                debug!("Loading settings from {:?}", path);
                Self::from_toml(&std::fs::read_to_string(path)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject durations that are negative or too large to schedule.
    fn validate(&self) -> Result<()> {
        if !(1..=MAX_REFRESH_HOURS).contains(&self.refresh_hours) {
            return Err(DepscanError::ConfigError(format!(
                "refresh_hours must be between 1 and {}, got {}",
                MAX_REFRESH_HOURS, self.refresh_hours
            )));
        }
        if self.memo_ttl_secs > MAX_TTL.as_secs() {
            return Err(DepscanError::ConfigError(format!(
                "memo_ttl_secs must be at most {}, got {}",
                MAX_TTL.as_secs(),
                self.memo_ttl_secs
            )));
        }
        if self.backoff_base_secs > MAX_BACKOFF_SECS {
            return Err(DepscanError::ConfigError(format!(
                "backoff_base_secs must be at most {}, got {}",
                MAX_BACKOFF_SECS, self.backoff_base_secs
            )));
        }
        Ok(())
    }

    pub fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy::from_hours(self.refresh_hours)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn http_config(&self, proxy: Option<String>) -> HttpConfig {
        HttpConfig {
            timeout_secs: self.request_timeout_secs,
            proxy,
            ..HttpConfig::default()
        }
    }

    pub fn memo(&self) -> ResolutionMemo {
        ResolutionMemo::new(self.memo_capacity, Duration::from_secs(self.memo_ttl_secs))
    }

    pub fn endpoints(&self) -> Result<RegistryEndpoints> {
        self.registries
            .iter()
            .try_fold(RegistryEndpoints::default(), |endpoints, (key, base)| {
                Ok(endpoints.with_base(ecosystem(key)?, base.as_str()))
            })
    }

    /// Language and manifest tables merged with the run's CLI choices.
    pub fn scan_settings(&self, min_stars: u64, force: bool) -> Result<ScanSettings> {
        let mut settings = ScanSettings {
            min_stars,
            force,
            freshness: self.freshness(),
            ..ScanSettings::default()
        };

        if let Some(ref languages) = self.languages {
            settings.languages = languages
                .iter()
                .map(|(language, key)| Ok((language.to_lowercase(), ecosystem(key)?)))
                .collect::<Result<HashMap<_, _>>>()?;
        }

        if let Some(ref manifests) = self.manifests {
            let mut table = HashMap::new();
            for (key, names) in manifests {
                if let Some(name) = names.iter().find(|n| manifest_kind(n).is_none()) {
                    return Err(DepscanError::ConfigError(format!(
                        "no parser for manifest '{}'",
                        name
                    )));
                }
                table.insert(ecosystem(key)?, names.clone());
            }
            settings.manifests = table;
        }

        Ok(settings)
    }
}

fn ecosystem(key: &str) -> Result<Ecosystem> {
    Ecosystem::from_key(key)
        .ok_or_else(|| DepscanError::ConfigError(format!("unknown registry '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.refresh_hours, 24);
        assert_eq!(settings.backoff_base_secs, 10);
        assert_eq!(settings.api_base, "https://api.github.com");
        assert_eq!(
            settings.retry_policy().backoff_base,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_settings_tables() {
        let settings = Settings::from_toml(
            r#"
            refresh_hours = 6

            [languages]
            Python = "pypi"
            Kotlin = "npm"

            [manifests]
            pypi = ["requirements.txt"]
            npm = ["package.json"]

            [registries]
            npm = "https://npm.internal.example"
            "#,
        )
        .unwrap();

        let scan = settings.scan_settings(50, true).unwrap();
        assert_eq!(scan.min_stars, 50);
        assert!(scan.force);
        assert_eq!(scan.ecosystem_for(Some("kotlin")), Some(Ecosystem::Npm));
        assert_eq!(scan.ecosystem_for(Some("Ruby")), None);
        assert!(scan.manifest_names(Ecosystem::Go).is_empty());
        assert_eq!(scan.freshness.window(), chrono::Duration::hours(6));

        let endpoints = settings.endpoints().unwrap();
        assert_eq!(endpoints.base(Ecosystem::Npm), "https://npm.internal.example");
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        for content in [
            "refresh_hours = 9223372036854775807",
            "refresh_hours = -3",
            "refresh_hours = 0",
            "memo_ttl_secs = 9223372036854775807",
            "backoff_base_secs = 9223372036854775807",
        ] {
            assert!(
                matches!(Settings::from_toml(content), Err(DepscanError::ConfigError(_))),
                "{} accepted",
                content
            );
        }

        let settings = Settings::from_toml("refresh_hours = 87600\nmemo_ttl_secs = 2592000").unwrap();
        assert_eq!(settings.freshness().window(), chrono::Duration::hours(87600));
        settings.memo().set_package(crate::types::ResolvedPackage::unresolved(
            crate::types::PackageIdentity::new("leftpad", Ecosystem::PyPi),
            Ecosystem::PyPi,
        ));
    }

    #[test]
    fn test_unknown_registry_is_rejected() {
        let settings = Settings::from_toml("[languages]\nRust = \"crates\"\n").unwrap();
        assert!(matches!(
            settings.scan_settings(0, false),
            Err(DepscanError::ConfigError(_))
        ));

        let settings = Settings::from_toml("[manifests]\npypi = [\"setup.py\"]\n").unwrap();
        assert!(settings.scan_settings(0, false).is_err());
    }

    #[test]
    fn test_target_validation() {
        assert!(is_valid_organisation("acme-corp_1"));
        assert!(!is_valid_organisation("acme corp"));
        assert!(!is_valid_organisation("acme/web"));
        assert!(is_valid_repository("acme/web.js"));
        assert!(!is_valid_repository("acme"));
        assert!(!is_valid_repository("acme/web/extra"));
    }

    #[test]
    fn test_load_targets_skips_invalid_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# bounty programs\nacme\n\nnot valid\nglobex").unwrap();

        let config = Config::parse_from([
            "depscan",
            "scan",
            "--orgs",
            file.path().to_str().unwrap(),
        ]);
        let Commands::Scan(scan) = config.command else {
            panic!("expected scan command");
        };
        assert_eq!(
            scan.load_targets().unwrap(),
            Targets::Organisations(vec!["acme".to_string(), "globex".to_string()])
        );
    }

    #[test]
    fn test_target_files_are_exclusive() {
        let result = Config::try_parse_from([
            "depscan", "scan", "--orgs", "a.txt", "--repos", "b.txt",
        ]);
        assert!(result.is_err());
        assert!(Config::try_parse_from(["depscan", "scan"]).is_err());
    }
}
