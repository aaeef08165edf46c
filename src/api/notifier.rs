//! Telegram notifications.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::types::SendMessage;
use super::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Telegram rejects messages above 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Sends messages to a single Telegram chat.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE.to_string(),
            token,
            chat_id,
        })
    }

    async fn post(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        if !response.status().is_success() {
            anyhow::bail!("Telegram request failed: {}", response.status());
        }
        Ok(())
    }
}

/// First `MAX_MESSAGE_CHARS` characters of `text`.
fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        if let Err(e) = self.post(truncate(text)).await {
            debug!(error = %e, "Notification dropped");
        }
    }
}

/// Used when no notification channel is configured.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) {
        debug!(text = %text, "Notification (no channel configured)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short"), "short");

        let long = "é".repeat(4500);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), 4000);
    }

    #[tokio::test]
    async fn test_unreachable_channel_is_swallowed() {
        let notifier = TelegramNotifier {
            client: Client::new(),
            base_url: "http://127.0.0.1:9".to_string(),
            token: "t".to_string(),
            chat_id: "c".to_string(),
        };
        // Must return without panicking or propagating the failure
        notifier.send("hello").await;
    }
}
