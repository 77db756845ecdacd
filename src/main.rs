//! depscan - Dependency confusion scanner.
//!
//! CLI entry point.

use clap::Parser;
use depscan::directory::GithubDirectory;
use depscan::http::{build_client, rate_limiter};
use depscan::notify::{ConsoleOutput, DiscordNotifier, TelegramNotifier};
use depscan::parser::GoModuleLocator;
use depscan::registry::RegistryResolver;
use depscan::scanner::stored_findings;
use depscan::store::MemoryStore;
use depscan::{Commands, Config, FindingsConfig, ScanConfig, Scanner, Settings};
use std::fs;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new("depscan=debug,warn")
        } else {
            EnvFilter::new("depscan=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match config.command.clone() {
        Commands::Scan(scan_config) => run_scan(scan_config, config.verbose).await,
        Commands::Findings(findings_config) => run_findings(findings_config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

/// Set `stop` on SIGTERM/SIGINT so the scan ends after the current repository.
fn spawn_signal_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (Ok(mut sigterm), Ok(mut sigint)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) else {
                warn!("Cannot register signal handlers");
                return;
            };

            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        eprintln!("\nSignal received, finishing the current repository...");
        stop.store(true, Ordering::SeqCst);
    });
}

async fn run_scan(scan_config: ScanConfig, verbose: bool) -> Result<(), ExitCode> {
    let targets = scan_config.load_targets().map_err(|e| {
        error!("Failed to load targets: {}", e);
        ExitCode::FAILURE
    })?;

    if targets.is_empty() {
        error!("No valid targets in the target file.");
        return Err(ExitCode::FAILURE);
    }

    let settings = Settings::load(scan_config.config.as_deref()).map_err(|e| {
        error!("Failed to load settings: {}", e);
        ExitCode::FAILURE
    })?;

    let (scanner, store) = build_scanner(&scan_config, &settings, verbose).map_err(|e| {
        error!("Failed to create scanner: {}", e);
        ExitCode::FAILURE
    })?;

    if !scan_config.json {
        print_banner();
    }

    spawn_signal_handler(scanner.stop_flag());

    let summary = match scanner.run(&targets).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Scan aborted: {}", e);
            save_store(&store);
            return Err(ExitCode::FAILURE);
        }
    };

    save_store(&store);

    if let Some(ref output_path) = scan_config.output {
        let json = serde_json::to_string_pretty(&summary).unwrap_or_default();
        if let Err(e) = fs::write(output_path, &json) {
            error!("Failed to write output file: {}", e);
            return Err(ExitCode::FAILURE);
        }
        info!("Results written to: {:?}", output_path);
    }

    let hijackable = summary.hijackable_count();
    if hijackable > 0 && !scan_config.json {
        eprintln!(
            "\n{} potentially hijackable dependencies found!",
            hijackable
        );
    }

    Ok(())
}

fn build_scanner(
    scan_config: &ScanConfig,
    settings: &Settings,
    verbose: bool,
) -> depscan::Result<(Scanner, Arc<MemoryStore>)> {
    let client = build_client(&settings.http_config(scan_config.proxy.clone()))?;
    let store = Arc::new(MemoryStore::load(scan_config.store_path())?);

    let directory = Arc::new(
        GithubDirectory::new(client.clone(), scan_config.token.clone())
            .with_api_base(settings.api_base.as_str())
            .with_retry(settings.retry_policy()),
    );

    let resolver = RegistryResolver::new(
        client.clone(),
        settings.endpoints()?,
        rate_limiter(settings.rate_limit),
        settings.retry_policy(),
        settings.freshness(),
    );

    let mut scanner = Scanner::new(
        directory.clone(),
        directory,
        store.clone(),
        resolver,
        GoModuleLocator::new(client),
        settings.scan_settings(scan_config.stars, scan_config.force)?,
    )
    .with_memo(settings.memo())
    .with_console(ConsoleOutput::new(verbose, scan_config.json, scan_config.quiet));

    if scan_config.telegram {
        match (&scan_config.telegram_token, &scan_config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                scanner = scanner.with_notifier(Arc::new(TelegramNotifier::new(token, chat_id)?));
            }
            _ => {
                return Err(depscan::DepscanError::ConfigError(
                    "Telegram notifications requested but DEPSCAN_TELEGRAM_TOKEN and/or DEPSCAN_TELEGRAM_CHAT_ID not set"
                        .to_string(),
                ));
            }
        }
    }

    if let Some(ref webhook) = scan_config.discord_webhook {
        scanner = scanner.with_notifier(Arc::new(DiscordNotifier::new(webhook)?));
    }

    Ok((scanner, store))
}

fn save_store(store: &MemoryStore) {
    if let Err(e) = store.save() {
        error!("Failed to save the store: {}", e);
    }
}

async fn run_findings(findings_config: FindingsConfig) -> Result<(), ExitCode> {
    let store = MemoryStore::load(findings_config.store_path()).map_err(|e| {
        error!("Failed to load the store: {}", e);
        ExitCode::FAILURE
    })?;

    let findings = stored_findings(&store).await.map_err(|e| {
        error!("Failed to read findings: {}", e);
        ExitCode::FAILURE
    })?;

    if findings_config.json {
        println!("{}", serde_json::to_string_pretty(&findings).unwrap_or_default());
        return Ok(());
    }

    let console = ConsoleOutput::new(false, false, false);
    for finding in &findings {
        println!("{} ({} stars)", finding.repository, finding.stars);
        console.print_finding(finding);
    }
    eprintln!("\n{} potentially hijackable dependencies recorded", findings.len());

    Ok(())
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                    DEPSCAN v{:<33}║\x1b[0m", env!("CARGO_PKG_VERSION"));
    println!("\x1b[36m║           Dependency Confusion Scanner                       ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
