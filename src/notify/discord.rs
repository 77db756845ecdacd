//! Discord webhook notifications.

use crate::notify::Notifier;
use crate::types::{DepscanError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

const EMBED_COLOR: u32 = 0x03b2f8;

#[derive(Serialize)]
struct WebhookRequest<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
}

/// Posts an embed to a Discord webhook for every ping.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn ping(&self, message: &str, title: &str) -> Result<()> {
        let body = WebhookRequest {
            embeds: [Embed {
                title,
                description: message,
                color: EMBED_COLOR,
            }],
        };

        let response = self.client.post(&self.webhook_url).json(&body).send().await?;

        if response.status().is_success() {
            debug!("Discord webhook delivered");
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Discord webhook returned {}: {}", status, error_text);
            Err(DepscanError::NotifyError(format!("{}: {}", status, error_text)))
        }
    }
}
