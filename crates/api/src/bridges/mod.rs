//! Outbound collaborators
//!
//! Each bridge is a narrow trait with one HTTP implementation, so the relay can be exercised
//! against stubs.

pub mod bot;
pub mod telegram;
pub mod ticketing;

pub use bot::{BotClient, BotReply, EscalationDetector, HttpBotClient};
pub use telegram::{TelegramClient, TelegramForward, WebhookTelegramClient};
pub use ticketing::{ClickUpTicketing, TicketRequest, TicketingClient};

/// Error type for bridge calls
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0} bridge is not configured")]
    Disabled(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from upstream: {0}")]
    InvalidResponse(String),
}

impl BridgeError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BridgeError::Status { status, .. } => *status == 429 || *status >= 500,
            BridgeError::Disabled(_) => false,
            BridgeError::InvalidResponse(_) => false,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Turn a non-2xx response into a [`BridgeError::Status`]
pub(crate) async fn check_status(response: reqwest::Response) -> BridgeResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BridgeError::Status {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}
