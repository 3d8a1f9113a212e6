// =============================================================================
// Telegram sink — best-effort remote copy of every report line
// =============================================================================
//
// One POST to the Bot API `sendMessage` endpoint per line, bounded by the
// client timeout. Failures are returned to the notifier, which logs them
// locally and moves on; nothing here retries.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::RemoteSink;
use crate::error::{ApiFailure, NotificationError};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Envelope every Bot API response is wrapped in.
#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramSink {
    token: String,
    chat_id: String,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramSink {
    /// # Arguments
    /// * `bot_token` — token issued by @BotFather.
    /// * `chat_id`   — destination chat, user, or channel id.
    /// * `timeout`   — upper bound on a single send.
    pub fn new(bot_token: &str, chat_id: &str, timeout: Duration) -> Result<Self> {
        Self::with_api_url(bot_token, chat_id, timeout, TELEGRAM_API_URL)
    }

    pub fn with_api_url(
        bot_token: &str,
        chat_id: &str,
        timeout: Duration,
        api_url: impl Into<String>,
    ) -> Result<Self> {
        if bot_token.trim().is_empty() {
            anyhow::bail!("Telegram bot token is empty");
        }
        if chat_id.trim().is_empty() {
            anyhow::bail!("Telegram chat id is empty");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Telegram HTTP client")?;

        Ok(Self {
            token: bot_token.trim().to_string(),
            chat_id: chat_id.trim().to_string(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

#[async_trait]
impl RemoteSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<(), NotificationError> {
        let resp = self
            .client
            .post(self.send_message_url())
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            // reqwest errors embed the URL, and the URL embeds the token.
            .map_err(|e| ApiFailure::from(e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            let reason = resp
                .json::<BotApiResponse>()
                .await
                .ok()
                .and_then(|r| r.description)
                .unwrap_or_else(|| status.to_string());
            return Err(ApiFailure::Rejected {
                status: status.as_u16(),
                reason,
            }
            .into());
        }

        let body: BotApiResponse = resp
            .json()
            .await
            .map_err(|e| ApiFailure::from(e.without_url()))?;
        if !body.ok {
            return Err(ApiFailure::Rejected {
                status: status.as_u16(),
                reason: body.description.unwrap_or_else(|| "ok=false".into()),
            }
            .into());
        }

        debug!(length = text.len(), "Telegram message sent");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}
