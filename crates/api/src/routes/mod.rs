//! API routes

pub mod chatbot;
pub mod health;
pub mod sessions;
pub mod telegram;
pub mod users;
pub mod webhooks;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts},
    routing::{get, patch, post},
    Router,
};
use chatrelay_shared::SessionId;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};
use crate::{state::AppState, websocket::ws_handler};

/// Integration webhooks send ids as JSON numbers or strings, and query strings only have strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseId {
    Int(i64),
    Text(String),
}

impl LooseId {
    pub fn into_text(self) -> String {
        match self {
            LooseId::Int(n) => n.to_string(),
            LooseId::Text(s) => s,
        }
    }

    pub fn to_session_id(&self, field: &str) -> ApiResult<SessionId> {
        match self {
            LooseId::Int(n) => Ok(SessionId(*n)),
            LooseId::Text(s) => s
                .trim()
                .parse()
                .map(SessionId)
                .map_err(|_| ApiError::Validation(format!("{field} must be a session id"))),
        }
    }
}

/// `Path` whose rejection renders in the API error shape
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let api_routes = Router::new()
        // Sessions
        .route("/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/sessions/:id", get(sessions::get_session))
        .route(
            "/sessions/:id/messages",
            get(sessions::list_messages).post(sessions::post_message),
        )
        .route("/sessions/:id/switch-mode", post(sessions::toggle_mode))
        .route("/sessions/:id/resolve", post(sessions::resolve_session))
        .route("/sessions/:id/escalate-to-tech", post(sessions::escalate_to_tech))
        // Bot passthrough
        .route("/chatbot", post(chatbot::chatbot))
        // Telegram bridge
        .route(
            "/telegram/message",
            get(telegram::inbound_query).post(telegram::inbound_json),
        )
        .route("/telegram/reply", post(telegram::reply))
        // External mode control
        .route("/mode-switch-webhook", post(webhooks::mode_switch))
        // Parties
        .route("/users/:user_id/name", patch(users::rename));

    // WebSocket route (identity comes from the userId query parameter)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api", api_routes)
        // Message bodies are capped at 50 000 characters; leave room for UTF-8 and JSON framing
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
