//! Notification module for alerts and output.
//!
//! This module handles:
//! - Colored console output
//! - Outbound pings through the [`Notifier`] trait (Telegram, Discord)
//! - Message formatting shared by the notifiers

pub mod console;
pub mod discord;
pub mod telegram;

pub use console::ConsoleOutput;
pub use discord::DiscordNotifier;
pub use telegram::TelegramNotifier;

use crate::types::{Finding, Result};
use async_trait::async_trait;

/// Title of the ping sent for a hijackable dependency.
pub const FINDING_TITLE: &str = "📦💥 Orphan dependency detected 💥📦";

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn ping(&self, message: &str, title: &str) -> Result<()>;
}

/// One to five stars by repository star count.
pub fn star_score(stars: u64) -> &'static str {
    match stars {
        0..=9 => "⭐",
        10..=49 => "⭐⭐",
        50..=499 => "⭐⭐⭐",
        500..=1999 => "⭐⭐⭐⭐",
        _ => "⭐⭐⭐⭐⭐",
    }
}

pub fn response_emoji(code: u16) -> &'static str {
    match code {
        200 => "🟢",
        404 => "🔴",
        429 => "🟣",
        _ => "🔵",
    }
}

/// Markdown body of a finding ping.
pub fn format_finding_message(finding: &Finding) -> String {
    let mut message = format!(
        "**Repository**: [{repo}](https://github.com/{repo})\n\
         **Stars**: {score} [{stars}]\n\
         **File**: [{path}](https://github.com/{repo}/blob/HEAD/{path})\n\
         **Dependency**: {package} ({version})\n\
         **Registry URL**: {url} [{code} {emoji}]\n",
        repo = finding.repository,
        score = star_score(finding.stars),
        stars = finding.stars,
        path = finding.manifest_path,
        package = finding.package,
        version = finding.version_constraint,
        url = finding.url,
        code = finding.response_code,
        emoji = response_emoji(finding.response_code),
    );
    if let Some(code) = finding.scope_response_code {
        message.push_str(&format!("**Scope Response**: [{} {}]\n", code, response_emoji(code)));
    }
    message.push_str(if finding.cached {
        "**Source**: Local 🏠"
    } else {
        "**Source**: Remote 📡"
    });
    message
}
