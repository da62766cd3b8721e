//! Telegram bridge routes
//!
//! Inbound updates arrive either as a GET with query parameters or as a POST with a JSON body.

use axum::{
    extract::{Query, State},
    Json,
};
use chatrelay_shared::{Message, SenderRole, Session};
use serde::{Deserialize, Serialize};

use super::LooseId;
use crate::{
    chat::{TelegramInbound, TelegramMode, TelegramReply},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct TelegramMessageParams {
    pub chat_id: Option<LooseId>,
    pub session_id: Option<LooseId>,
    /// Accepted for compatibility; the chat id identifies the party
    pub user_id: Option<LooseId>,
    pub username: Option<String>,
    pub message: Option<String>,
    pub message_user: Option<String>,
    pub message_majoo: Option<String>,
    #[serde(default)]
    pub mode: TelegramMode,
}

impl TelegramMessageParams {
    fn into_inbound(self) -> ApiResult<TelegramInbound> {
        let chat_id = self
            .chat_id
            .map(LooseId::into_text)
            .ok_or_else(|| ApiError::Validation("chat_id is required".to_string()))?;
        let session_id = self
            .session_id
            .map(|id| id.to_session_id("session_id"))
            .transpose()?;

        Ok(TelegramInbound {
            chat_id,
            session_id,
            username: self.username,
            message: self.message,
            message_user: self.message_user,
            message_majoo: self.message_majoo,
            mode: self.mode,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TelegramMessageResponse {
    pub success: bool,
    pub session: Session,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramReplyBody {
    pub session_id: Option<LooseId>,
    pub message: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TelegramReplyResponse {
    pub success: bool,
    pub message: Message,
}

async fn handle_inbound(
    state: AppState,
    params: TelegramMessageParams,
) -> ApiResult<Json<TelegramMessageResponse>> {
    let inbound = params.into_inbound()?;
    tracing::debug!(chat_id = %inbound.chat_id, mode = ?inbound.mode, "Telegram update received");

    let outcome = state.relay.telegram_inbound(inbound).await?;
    Ok(Json(TelegramMessageResponse {
        success: true,
        session: outcome.session,
        message: outcome.message,
    }))
}

pub async fn inbound_query(
    State(state): State<AppState>,
    Query(params): Query<TelegramMessageParams>,
) -> ApiResult<Json<TelegramMessageResponse>> {
    handle_inbound(state, params).await
}

pub async fn inbound_json(
    State(state): State<AppState>,
    Json(params): Json<TelegramMessageParams>,
) -> ApiResult<Json<TelegramMessageResponse>> {
    handle_inbound(state, params).await
}

/// Agent reply to a Telegram chat
pub async fn reply(
    State(state): State<AppState>,
    Json(body): Json<TelegramReplyBody>,
) -> ApiResult<Json<TelegramReplyResponse>> {
    let (Some(session_id), Some(message), Some(sender)) = (body.session_id, body.message, body.sender)
    else {
        return Err(ApiError::BadRequest("Missing required parameters".to_string()));
    };
    let session_id = session_id.to_session_id("sessionId")?;
    let sender: SenderRole = sender
        .parse()
        .map_err(|e: chatrelay_shared::ParseEnumError| ApiError::Validation(e.to_string()))?;

    let message = state
        .relay
        .telegram_reply(TelegramReply {
            session_id,
            message,
            sender,
        })
        .await?;

    Ok(Json(TelegramReplyResponse {
        success: true,
        message,
    }))
}
