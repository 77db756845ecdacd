//! depscan - Dependency confusion scanner for GitHub organisations.
//!
//! This library detects dependencies that could be hijacked by publishing a
//! package under their name:
//! - Listing repositories of organisations through a [`directory`]
//! - Parsing their manifests (requirements.txt, Pipfile, package.json, go.mod, Gemfile)
//! - Probing the public registries for every declared package and npm scope
//! - Caching answers in a [`store`] and re-checking them once stale
//!
//! # Example
//!
//! ```no_run
//! use depscan::directory::GithubDirectory;
//! use depscan::http::{build_client, rate_limiter, HttpConfig};
//! use depscan::parser::GoModuleLocator;
//! use depscan::registry::{RegistryEndpoints, RegistryResolver, RetryPolicy};
//! use depscan::scanner::{ScanSettings, Scanner, Targets};
//! use depscan::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> depscan::Result<()> {
//!     let client = build_client(&HttpConfig::default())?;
//!     let directory = Arc::new(GithubDirectory::new(client.clone(), std::env::var("GITHUB_TOKEN").ok()));
//!     let resolver = RegistryResolver::new(
//!         client.clone(),
//!         RegistryEndpoints::default(),
//!         rate_limiter(10),
//!         RetryPolicy::default(),
//!         Default::default(),
//!     );
//!     let scanner = Scanner::new(
//!         directory.clone(),
//!         directory,
//!         Arc::new(MemoryStore::new()),
//!         resolver,
//!         GoModuleLocator::new(client),
//!         ScanSettings::default(),
//!     );
//!
//!     let summary = scanner.run(&Targets::Organisations(vec!["acme".into()])).await?;
//!     println!("Found {} potentially hijackable dependencies", summary.hijackable_count());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod freshness;
pub mod http;
pub mod notify;
pub mod parser;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod types;

pub use config::{Commands, Config, FindingsConfig, ScanConfig, Settings};
pub use scanner::{Scanner, Targets};
pub use types::{
    DependencyReference, DepscanError, Ecosystem, Finding, OriginKind, Outcome, PackageIdentity,
    ResolvedPackage, Result, RunSummary, Severity,
};
