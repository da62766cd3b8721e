//! Chat session routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chatrelay_shared::{Message, PartyId, SenderRole, Session, SessionId, SessionStatus, TicketRef};
use serde::{Deserialize, Serialize};

use super::ApiPath;
use crate::{
    chat::NewChat,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub is_bot_mode: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
    pub success: bool,
    pub is_bot_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct EscalateResponse {
    pub success: bool,
    pub message: &'static str,
    pub ticket: Option<TicketRef>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Open a session
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state
        .relay
        .create_session(NewChat {
            user_id: req.user_id,
            user_name: req.user_name,
            is_bot_mode: req.is_bot_mode,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Sessions of one party, or all active sessions for the admin console
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let party = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .map(PartyId::from);
    Ok(Json(state.relay.list_sessions(party.as_ref()).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.relay.get_session(id).await?))
}

pub async fn list_messages(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.relay.list_messages(id).await?))
}

/// Append a message; user messages in bot mode are answered before the response is sent
pub async fn post_message(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let sender: SenderRole = req
        .sender
        .parse()
        .map_err(|e: chatrelay_shared::ParseEnumError| ApiError::Validation(e.to_string()))?;
    let message = state.relay.post_message(id, sender, req.message).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn toggle_mode(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
) -> ApiResult<Json<ModeResponse>> {
    let outcome = state.relay.toggle_mode(id).await?;
    Ok(Json(ModeResponse {
        success: true,
        is_bot_mode: outcome.session.is_bot_mode,
    }))
}

pub async fn resolve_session(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
) -> ApiResult<Json<ResolveResponse>> {
    let session = state.relay.resolve(id).await?;
    Ok(Json(ResolveResponse {
        success: true,
        status: session.status,
    }))
}

pub async fn escalate_to_tech(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<SessionId>,
    Json(req): Json<EscalateRequest>,
) -> ApiResult<Json<EscalateResponse>> {
    let outcome = state.relay.escalate(id, &req.reason).await?;
    let message = if outcome.already_escalated {
        "Session already escalated to technical team"
    } else {
        "Session escalated to technical team successfully"
    };
    Ok(Json(EscalateResponse {
        success: true,
        message,
        ticket: outcome.ticket,
    }))
}
