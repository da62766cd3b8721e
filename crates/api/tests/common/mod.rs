//! Shared fixtures for the end-to-end relay tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chatrelay_api::{
    bridges::{
        BotClient, BotReply, BridgeError, BridgeResult, TelegramClient, TelegramForward,
        TicketRequest, TicketingClient,
    },
    create_router,
    websocket::{connection::Connection, events::ServerEvent},
    AppState, Bridges, Config,
};
use chatrelay_shared::{MemoryStore, PartyId, TicketRef};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tower::ServiceExt;

// ============================================================================
// Stub bridges
// ============================================================================

/// Answers with queued JSON bodies; fails once the queue is empty
#[derive(Default)]
pub struct StubBot {
    replies: Mutex<VecDeque<Value>>,
}

impl StubBot {
    pub fn replying(replies: impl IntoIterator<Item = Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl BotClient for StubBot {
    async fn invoke(&self, _name: &str, _message: &str, _branch_id: &str) -> BridgeResult<BotReply> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(raw) => Ok(BotReply::from_json(raw)),
            None => Err(BridgeError::Status {
                status: 503,
                body: "bot offline".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct StubTicketing {
    pub ticket: Option<TicketRef>,
    pub calls: Mutex<usize>,
}

#[async_trait]
impl TicketingClient for StubTicketing {
    async fn create_ticket(&self, _request: &TicketRequest) -> BridgeResult<TicketRef> {
        *self.calls.lock().unwrap() += 1;
        self.ticket.clone().ok_or(BridgeError::Disabled("ticketing"))
    }
}

#[derive(Default)]
pub struct StubTelegram {
    pub forwarded: Mutex<Vec<TelegramForward>>,
}

#[async_trait]
impl TelegramClient for StubTelegram {
    async fn forward(&self, payload: &TelegramForward) -> BridgeResult<()> {
        self.forwarded.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

// ============================================================================
// App harness
// ============================================================================

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub ticketing: Arc<StubTicketing>,
    pub telegram: Arc<StubTelegram>,
}

pub fn app_with(bot: StubBot, ticketing: StubTicketing) -> TestApp {
    let ticketing = Arc::new(ticketing);
    let telegram = Arc::new(StubTelegram::default());
    let bridges = Bridges {
        bot: Arc::new(bot),
        ticketing: ticketing.clone(),
        telegram: telegram.clone(),
    };
    let state = AppState::new(Config::default(), Arc::new(MemoryStore::new()), bridges);
    TestApp {
        app: create_router(state.clone()),
        state,
        ticketing,
        telegram,
    }
}

pub fn app() -> TestApp {
    app_with(StubBot::default(), StubTicketing::default())
}

impl TestApp {
    /// Send a request and decode the JSON body (`Null` when empty)
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body)).await
    }

    /// Register a live connection for `party`, as a websocket upgrade would
    pub async fn connect(&self, party: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .router
            .attach(Connection::new(PartyId::from(party), tx))
            .await;
        rx
    }

    /// Create a session and return its id
    pub async fn open_session(&self, user_id: &str) -> i64 {
        let (status, body) = self
            .post(
                "/api/sessions",
                serde_json::json!({ "userId": user_id, "userName": "Budi" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    pub async fn messages(&self, session_id: i64) -> Vec<Value> {
        let (status, body) = self
            .get(&format!("/api/sessions/{session_id}/messages"))
            .await;
        assert_eq!(status, StatusCode::OK);
        body.as_array().unwrap().clone()
    }
}

/// Everything queued on a receiver right now
pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
