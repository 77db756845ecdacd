//! Telegram bot notifications.

use crate::notify::Notifier;
use crate::types::{DepscanError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram message request body.
#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram notification handler.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier.
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            api_base: TELEGRAM_API.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a raw message via Telegram Bot API.
    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        let body = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if response.status().is_success() {
            debug!("Telegram message sent successfully");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to send Telegram message: {}", error_text);
            Err(DepscanError::NotifyError(error_text))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn ping(&self, message: &str, title: &str) -> Result<()> {
        // Telegram's legacy Markdown knows *bold*, not **bold**.
        let text = format!("*{}*\n\n{}", title, message.replace("**", "*"));
        self.send_message(&text).await
    }
}
