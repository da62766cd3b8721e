//! Direct bot passthrough

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LooseId;
use crate::{
    chat::ChatbotRequest,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotBody {
    pub name: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "id_cabang")]
    pub branch_id: Option<String>,
    pub session_id: Option<LooseId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotResponse {
    pub success: bool,
    /// Raw bot response
    pub response: Value,
    pub message: String,
    pub needs_human_help: bool,
}

pub async fn chatbot(
    State(state): State<AppState>,
    Json(body): Json<ChatbotBody>,
) -> ApiResult<Json<ChatbotResponse>> {
    let (Some(name), Some(message)) = (body.name, body.message) else {
        return Err(ApiError::BadRequest(
            "Missing required parameters. Required: name, message".to_string(),
        ));
    };
    let session_id = body
        .session_id
        .map(|id| id.to_session_id("sessionId"))
        .transpose()?;

    let outcome = state
        .relay
        .chatbot(ChatbotRequest {
            name,
            message,
            branch_id: body.branch_id,
            session_id,
        })
        .await?;

    Ok(Json(ChatbotResponse {
        success: true,
        message: outcome.reply.display_text().to_string(),
        response: outcome.reply.raw,
        needs_human_help: outcome.needs_human_help,
    }))
}
