//! WebSocket handler for Axum
//!
//! The identity is taken from the `userId` query parameter; there is no authentication.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use chatrelay_shared::PartyId;
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::routing::FanoutRouter;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
};

/// Identity used when the upgrade request names none
pub const ANONYMOUS_PARTY: &str = "anonymous";

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

impl WebSocketQuery {
    fn party(&self) -> PartyId {
        match self.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => PartyId::from(id),
            _ => PartyId::from(ANONYMOUS_PARTY),
        }
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Response {
    let party = params.party();
    tracing::info!(party = %party, role = %party.role(), "WebSocket connection upgrade requested");

    let router = state.router.clone();
    let heartbeat = state.config.ws_heartbeat_interval();
    ws.on_upgrade(move |socket| handle_socket(socket, party, router, heartbeat))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, party: PartyId, router: FanoutRouter, heartbeat: Duration) {
    let (mut sender, mut receiver) = socket.split();

    // Channel feeding this socket's writer task
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Registering replays anything cached while the party was away
    let conn = router.attach(Connection::new(party, tx)).await;
    let connection_id = conn.connection_id;

    let send_task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = ticker.tick() => ServerEvent::ping_now(),
            };

            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Ping { timestamp }) => {
                    tracing::trace!(connection_id = %connection_id, ?timestamp, "Client ping");
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Ignoring unrecognised client frame"
                    );
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    router.detach(&conn).await;
    send_task.abort();
}
