//! Client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket handshake timed out")]
    Timeout,

    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
