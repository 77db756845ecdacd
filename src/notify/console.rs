//! Colored console output for scan results.

use crate::notify::{response_emoji, star_score};
use crate::types::{Finding, Outcome, RepositoryInfo, RepositoryReport, RunSummary, Severity};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Console output handler with colors and formatting.
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    /// Create a new console output handler.
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self { verbose, json_mode, quiet }
    }

    /// Print scan start message.
    pub fn print_scan_start(&self, count: usize, kind: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!(
            "{} Scanning {} {}",
            "[*]".bright_blue(),
            count.to_string().bright_white(),
            kind
        );
    }

    /// Print the header of a repository about to be scanned.
    pub fn print_repository(&self, index: usize, total: usize, repository: &RepositoryInfo) {
        if self.json_mode || self.quiet {
            return;
        }

        println!();
        println!(
            "{} Repository #{}/{}: {} - {} [{}] (Lang: {})",
            "===".bright_cyan(),
            index,
            total,
            repository.full_name.bright_white().bold(),
            star_score(repository.star_count),
            repository.star_count,
            repository.language.as_deref().unwrap_or("unknown")
        );
    }

    /// Print scan progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print info message.
    pub fn print_info(&self, message: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Print a finding. Settled packages are only shown in verbose mode.
    pub fn print_finding(&self, finding: &Finding) {
        if self.json_mode {
            return;
        }
        if !self.verbose && finding.outcome != Outcome::PotentiallyHijackable {
            return;
        }

        let marker = match finding.outcome {
            Outcome::PotentiallyHijackable => "+".green().bold(),
            Outcome::ConfirmedExisting | Outcome::ConfirmedNamespaceOccupied => "-".red(),
            Outcome::Indeterminate => "?".yellow(),
        };

        let severity = match finding.severity {
            Severity::Critical => "CRITICAL".on_red().white().bold(),
            Severity::High => "HIGH".red().bold(),
            Severity::Low => "LOW".blue(),
            Severity::Info => "INFO".dimmed(),
        };

        let mut codes = format!(
            "{} {}",
            finding.response_code,
            response_emoji(finding.response_code)
        );
        if let Some(code) = finding.scope_response_code {
            codes.push_str(&format!(" / scope {} {}", code, response_emoji(code)));
        }

        println!(
            "[{}] {} ({}) [{}]",
            marker,
            finding.package.bright_white().bold(),
            finding.version_constraint,
            severity
        );
        println!("    |-- Manifest: {}", finding.manifest_path);
        println!("    |-- URL: {} [{}]", finding.url.dimmed(), codes);
        println!(
            "    +-- Source: {}",
            if finding.cached { "local 🏠" } else { "remote 📡" }
        );
    }

    /// Print the outcome of one repository.
    pub fn print_report(&self, report: &RepositoryReport) {
        if self.json_mode {
            return;
        }

        let hijackable = report.findings.iter().filter(|f| f.is_hijackable()).count();
        if self.quiet && hijackable == 0 {
            return;
        }

        println!(
            "    {} manifests, {} dependencies, {} in {:.2}s",
            report.manifests_scanned,
            report.dependencies,
            if hijackable > 0 {
                format!("{} potentially hijackable", hijackable).red().bold()
            } else {
                "nothing hijackable".green()
            },
            report.duration_secs
        );

        for error in &report.errors {
            println!("    {} {}", "!".yellow(), error.dimmed());
        }
    }

    /// Print run summary.
    pub fn print_summary(&self, summary: &RunSummary) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string_pretty(summary) {
                println!("{}", json);
            }
            return;
        }

        let hijackable = summary.hijackable_count();
        let errors: usize = summary.repositories.iter().map(|r| r.errors.len()).sum();

        println!();
        println!("{}", "=== Scan Summary ===".bright_cyan());
        println!("  Repositories: {}", summary.repositories.len());
        println!("  Duration:     {:.2}s", summary.duration_secs);
        println!(
            "  Dependencies: {}",
            summary.repositories.iter().map(|r| r.dependencies).sum::<usize>()
        );
        if errors > 0 {
            println!("  Errors:       {}", errors.to_string().yellow());
        }

        if hijackable > 0 {
            println!(
                "  {}",
                format!("POTENTIALLY HIJACKABLE DEPENDENCIES: {}", hijackable)
                    .red()
                    .bold()
            );
        } else {
            println!("  {}", "No dependency confusion candidates found.".green());
        }

        println!();
    }

    /// Create a progress bar.
    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode || self.verbose {
            return None;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message.to_string());
        Some(pb)
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}
