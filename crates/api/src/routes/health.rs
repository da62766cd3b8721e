//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Store backend and its status, e.g. "postgres: healthy"
    pub store: String,
    pub connections: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.relay.store();
    let store_status = match store.health_check().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, store = store.kind(), "Store health check failed");
            "unhealthy"
        }
    };

    let overall_status = if store_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        overall_status,
        Json(HealthResponse {
            status: store_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: format!("{}: {}", store.kind(), store_status),
            connections: state.router.registry().connection_count().await,
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks the session store is reachable)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.relay.store().health_check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
