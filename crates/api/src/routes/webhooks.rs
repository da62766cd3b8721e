//! Mode control for external systems

use axum::{extract::State, Json};
use chatrelay_shared::{PartyId, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};

use super::LooseId;
use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSwitchRequest {
    /// `true` hands the session to an admin, `false` back to the bot
    pub switch: bool,
    pub session_id: LooseId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub user_id: PartyId,
    pub user_name: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSwitchResponse {
    pub success: bool,
    pub is_bot_mode: bool,
    pub message: &'static str,
    pub session: SessionSummary,
}

pub async fn mode_switch(
    State(state): State<AppState>,
    Json(req): Json<ModeSwitchRequest>,
) -> ApiResult<Json<ModeSwitchResponse>> {
    let id = req.session_id.to_session_id("sessionId")?;
    let outcome = state.relay.set_mode_via_webhook(id, !req.switch).await?;
    let session = outcome.session;

    Ok(Json(ModeSwitchResponse {
        success: true,
        is_bot_mode: session.is_bot_mode,
        message: if session.is_bot_mode {
            "Changed to bot mode"
        } else {
            "Changed to admin mode"
        },
        session: SessionSummary {
            id: session.id,
            user_id: session.user_id,
            user_name: session.user_name,
            status: session.status,
        },
    }))
}
