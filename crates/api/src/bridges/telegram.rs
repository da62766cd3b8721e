//! Telegram bridge
//!
//! Replies for Telegram-originated sessions are posted to an external webhook, which owns the
//! actual Bot API conversation.

use std::time::Duration;

use async_trait::async_trait;
use chatrelay_shared::SenderRole;
use reqwest::Client;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::{check_status, BridgeError, BridgeResult};

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: usize = 3;

/// Initial backoff duration for retries
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum backoff duration for retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Payload posted to the Telegram webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelegramForward {
    pub chat_id: String,
    /// What the Telegram user wrote, empty for agent-initiated replies
    pub message_user: String,
    /// What MajooCare (bot, admin or tech) replied
    pub message_majoo: String,
    pub sender: SenderRole,
    /// "bot" or "admin"
    pub mode: &'static str,
}

impl TelegramForward {
    pub fn mode_label(is_bot_mode: bool) -> &'static str {
        if is_bot_mode {
            "bot"
        } else {
            "admin"
        }
    }
}

#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn forward(&self, payload: &TelegramForward) -> BridgeResult<()>;
}

/// Webhook implementation of [`TelegramClient`]
pub struct WebhookTelegramClient {
    http: Client,
    url: Option<String>,
}

impl WebhookTelegramClient {
    pub fn new(url: Option<String>) -> BridgeResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, url })
    }

    async fn post_once(&self, url: &str, payload: &TelegramForward) -> BridgeResult<()> {
        let response = self.http.post(url).json(payload).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TelegramClient for WebhookTelegramClient {
    async fn forward(&self, payload: &TelegramForward) -> BridgeResult<()> {
        let url = self.url.as_deref().ok_or(BridgeError::Disabled("telegram"))?;

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        RetryIf::spawn(
            retry_strategy,
            || self.post_once(url, payload),
            |e: &BridgeError| {
                let retry = e.is_transient();
                if retry {
                    tracing::warn!(chat_id = %payload.chat_id, error = %e, "Transient Telegram forward failure, retrying");
                }
                retry
            },
        )
        .await?;

        tracing::debug!(chat_id = %payload.chat_id, sender = %payload.sender, "Forwarded reply to Telegram");
        Ok(())
    }
}
