//! Party routes

use axum::{
    extract::State,
    Json,
};
use chatrelay_shared::{PartyId, Session};
use serde::Deserialize;

use super::ApiPath;
use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub new_user_name: String,
}

/// Rename a party across all of its sessions
pub async fn rename(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state
        .relay
        .rename_party(&PartyId::from(user_id), &req.new_user_name)
        .await?;
    Ok(Json(sessions))
}
