//! End-to-end tests for the chat relay
//!
//! Drive the HTTP router in process with an in-memory store and stub bridges, and observe
//! real-time fan-out through registered connections.
//!
//! ## Test Coverage
//! - Session creation, bot hand-off, resolution, toggle rejection
//! - Tech escalation with no tech agent online (delivery cache replay)
//! - Multi-connection delivery for one identity
//! - Message ordering under concurrent appends
//! - Telegram inbound and reply flows, mode-switch webhook
//!
//! ## Running Tests
//! ```bash
//! cargo test -p chatrelay-api --test relay_flows
//! ```

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::{Method, StatusCode};
use chatrelay_api::websocket::events::ServerEvent;
use chatrelay_shared::{PartyId, SenderRole, TicketRef, TECH_FALLBACK_BUCKET};
use common::{app, app_with, drain, StubBot, StubTicketing};
use serde_json::json;

#[tokio::test]
async fn test_new_session_is_greeted_by_bot() {
    let t = app();
    let mut admin = t.connect("admin-1").await;

    let (status, session) = t
        .post(
            "/api/sessions",
            json!({ "userId": "user-1", "userName": "Budi" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["isBotMode"], true);
    assert_eq!(session["status"], "active");
    assert_eq!(session["techEscalation"], serde_json::Value::Null);

    let messages = t.messages(session["id"].as_i64().unwrap()).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender"], "bot");
    assert!(messages[0]["message"]
        .as_str()
        .unwrap()
        .starts_with("Hai saya MajooCare"));

    let events = drain(&mut admin);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "new_session");
}

#[tokio::test]
async fn test_bot_asking_for_human_hands_session_to_admin() {
    let t = app_with(
        StubBot::replying([json!({ "message": "Sebentar ya", "needsHumanHelp": true })]),
        StubTicketing::default(),
    );
    let id = t.open_session("user-1").await;
    let mut user = t.connect("user-1").await;

    let (status, message) = t
        .post(
            &format!("/api/sessions/{id}/messages"),
            json!({ "sender": "user", "message": "printer saya rusak" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["sender"], "user");

    let (_, session) = t.get(&format!("/api/sessions/{id}")).await;
    assert_eq!(session["isBotMode"], false);

    let messages = t.messages(id).await;
    let tail: Vec<_> = messages[messages.len() - 2..]
        .iter()
        .map(|m| (m["sender"].as_str().unwrap(), m["message"].as_str().unwrap()))
        .collect();
    assert_eq!(
        tail,
        vec![
            ("bot", "Sebentar ya"),
            ("system", "Bot escalated to admin support"),
        ]
    );

    // The user sees the bot reply and the hand-off, not their own message
    let kinds: Vec<_> = drain(&mut user).iter().map(ServerEvent::kind).collect();
    assert_eq!(kinds, vec!["new_message", "mode_changed"]);
}

#[tokio::test]
async fn test_resolve_is_applied_once() {
    let t = app();
    let id = t.open_session("user-1").await;
    t.post(&format!("/api/sessions/{id}/switch-mode"), json!({}))
        .await;

    let (status, body) = t
        .post(&format!("/api/sessions/{id}/resolve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "status": "resolved" }));

    let (_, session) = t.get(&format!("/api/sessions/{id}")).await;
    assert_eq!(session["isBotMode"], true);

    t.post(&format!("/api/sessions/{id}/resolve"), json!({}))
        .await;
    let resolved_notes = t
        .messages(id)
        .await
        .iter()
        .filter(|m| m["message"] == "Chat marked as resolved")
        .count();
    assert_eq!(resolved_notes, 1);
}

#[tokio::test]
async fn test_toggle_on_resolved_session_is_rejected() {
    let t = app();
    let id = t.open_session("user-1").await;
    t.post(&format!("/api/sessions/{id}/resolve"), json!({}))
        .await;
    let before = t.messages(id).await.len();

    let (status, body) = t
        .post(&format!("/api/sessions/{id}/switch-mode"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, session) = t.get(&format!("/api/sessions/{id}")).await;
    assert_eq!(session["isBotMode"], true);
    assert_eq!(t.messages(id).await.len(), before);
}

#[tokio::test]
async fn test_escalation_waits_for_first_tech_agent() {
    let t = app();
    let id = t.open_session("user-1").await;

    let (status, body) = t
        .post(
            &format!("/api/sessions/{id}/escalate-to-tech"),
            json!({ "reason": "payment gateway fails" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["ticket"], serde_json::Value::Null);

    let bucket = PartyId::from(TECH_FALLBACK_BUCKET);
    assert_eq!(t.state.router.cache().pending_for(&bucket), 1);

    let mut tech = t.connect("tech-1").await;
    let events = drain(&mut tech);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerEvent::NewTechIssue {
            reason, session, ..
        } => {
            assert_eq!(reason, "payment gateway fails");
            assert_eq!(session.id.0, id);
        }
        other => panic!("expected new_tech_issue, got {other:?}"),
    }
    assert_eq!(t.state.router.cache().pending_for(&bucket), 0);
}

#[tokio::test]
async fn test_escalation_with_ticket_is_not_repeated() {
    let t = app_with(
        StubBot::default(),
        StubTicketing {
            ticket: Some(TicketRef {
                id: "86abc".to_string(),
                url: "https://app.clickup.com/t/86abc".to_string(),
            }),
            ..Default::default()
        },
    );
    let id = t.open_session("user-1").await;
    let mut owner = t.connect("user-1").await;
    let mut admin = t.connect("admin-1").await;

    let (_, first) = t
        .post(
            &format!("/api/sessions/{id}/escalate-to-tech"),
            json!({ "reason": "login loop" }),
        )
        .await;
    assert_eq!(first["ticket"]["id"], "86abc");

    let admin_events = drain(&mut admin);
    assert!(admin_events.iter().any(|e| matches!(
        e,
        ServerEvent::TechEscalation { ticket: Some(ticket), .. } if ticket.id == "86abc"
    )));

    // The end user gets the notice without the ticket link
    let owner_notices: Vec<_> = drain(&mut owner)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::TechEscalation { ticket, .. } => Some(ticket),
            _ => None,
        })
        .collect();
    assert_eq!(owner_notices, vec![None]);

    let (status, second) = t
        .post(
            &format!("/api/sessions/{id}/escalate-to-tech"),
            json!({ "reason": "login loop again" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["message"], "Session already escalated to technical team");
    assert_eq!(second["ticket"]["id"], "86abc");
    assert_eq!(*t.ticketing.calls.lock().unwrap(), 1);

    let (status, short) = t
        .post(
            &format!("/api/sessions/{id}/escalate-to-tech"),
            json!({ "reason": "bad" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(short["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_every_connection_of_an_identity_receives_messages() {
    let t = app();
    let id = t
        .post(
            "/api/sessions",
            json!({ "userId": "user-1", "userName": "Budi", "isBotMode": false }),
        )
        .await
        .1["id"]
        .as_i64()
        .unwrap();

    let mut first = t.connect("admin-7").await;
    let mut second = t.connect("admin-7").await;

    t.post(
        &format!("/api/sessions/{id}/messages"),
        json!({ "sender": "user", "message": "halo admin" }),
    )
    .await;

    for rx in [&mut first, &mut second] {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "new_message");
    }
}

#[tokio::test]
async fn test_dead_connection_does_not_block_delivery() {
    let t = app();
    let id = t
        .post(
            "/api/sessions",
            json!({ "userId": "user-1", "userName": "Budi", "isBotMode": false }),
        )
        .await
        .1["id"]
        .as_i64()
        .unwrap();

    let dead = t.connect("admin-1").await;
    drop(dead);
    let mut live = t.connect("admin-2").await;

    let (status, _) = t
        .post(
            &format!("/api/sessions/{id}/messages"),
            json!({ "sender": "user", "message": "ada orang?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(drain(&mut live).len(), 1);
}

#[tokio::test]
async fn test_concurrent_appends_keep_creation_order() {
    let t = app();
    let id = t
        .post(
            "/api/sessions",
            json!({ "userId": "user-1", "userName": "Budi", "isBotMode": false }),
        )
        .await
        .1["id"]
        .as_i64()
        .unwrap();

    let mut tasks = Vec::new();
    for n in 0..20 {
        let app = t.app.clone();
        tasks.push(tokio::spawn(async move {
            use tower::ServiceExt;
            let request = axum::http::Request::builder()
                .method(Method::POST)
                .uri(format!("/api/sessions/{id}/messages"))
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "sender": "admin", "message": format!("msg {n}") }).to_string(),
                ))
                .unwrap();
            app.oneshot(request).await.unwrap().status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::CREATED);
    }

    let messages = t.messages(id).await;
    assert_eq!(messages.len(), 21);
    let stamps: Vec<time::OffsetDateTime> = messages
        .iter()
        .map(|m| {
            time::OffsetDateTime::parse(
                m["createdAt"].as_str().unwrap(),
                &time::format_description::well_known::Rfc3339,
            )
            .unwrap()
        })
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    let ids: Vec<i64> = messages.iter().map(|m| m["id"].as_i64().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_unknown_session_and_bad_input() {
    let t = app();

    let (status, body) = t.get("/api/sessions/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = t.get("/api/sessions/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = t.get("/api/sessions/999/messages").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .post(
            "/api/sessions",
            json!({ "userId": "ab", "userName": "Budi" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let id = t.open_session("user-1").await;
    let (status, body) = t
        .post(
            &format!("/api/sessions/{id}/messages"),
            json!({ "sender": "robot", "message": "beep" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_list_sessions_by_party_and_active() {
    let t = app();
    let first = t.open_session("user-1").await;
    let second = t.open_session("user-1").await;
    let other = t.open_session("user-2").await;
    t.post(&format!("/api/sessions/{other}/resolve"), json!({}))
        .await;

    let (_, mine) = t.get("/api/sessions?userId=user-1").await;
    let ids: Vec<i64> = mine
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![second, first]);

    let (_, active) = t.get("/api/sessions").await;
    assert_eq!(active.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_mode_switch_webhook() {
    let t = app();
    let id = t.open_session("user-1").await;

    let (status, body) = t
        .post(
            "/api/mode-switch-webhook",
            json!({ "switch": true, "sessionId": id.to_string() }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isBotMode"], false);
    assert_eq!(body["message"], "Changed to admin mode");
    assert_eq!(body["session"]["userId"], "user-1");

    let last = t.messages(id).await.pop().unwrap();
    assert_eq!(last["message"], "Switched to admin mode (via webhook)");
}

#[tokio::test]
async fn test_telegram_round_trip() {
    let t = app_with(
        StubBot::replying([json!({ "output": "Coba restart aplikasinya kak" })]),
        StubTicketing::default(),
    );

    let (status, body) = t
        .call(
            Method::GET,
            "/api/telegram/message?chat_id=123456789&username=ani&message_user=aplikasi%20error",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["userId"], "123456789");
    assert_eq!(body["message"]["sender"], "bot");
    let id = body["session"]["id"].as_i64().unwrap();

    let (status, reply) = t
        .post(
            "/api/telegram/reply",
            json!({ "sessionId": id, "message": "Sudah kami cek", "sender": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["message"]["sender"], "admin");

    let forwarded = t.telegram.forwarded.lock().unwrap().clone();
    assert_eq!(forwarded.len(), 2);
    assert_eq!(forwarded[0].message_majoo, "Coba restart aplikasinya kak");
    assert_eq!(forwarded[1].chat_id, "123456789");
    assert_eq!(forwarded[1].sender, SenderRole::Admin);

    let (status, _) = t
        .post("/api/telegram/reply", json!({ "sessionId": id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rename_party() {
    let t = app();
    t.open_session("user-1").await;

    let (status, body) = t
        .call(
            Method::PATCH,
            "/api/users/user-1/name",
            Some(json!({ "newUserName": "Budi Santoso" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["userName"], "Budi Santoso");

    let (status, _) = t
        .call(
            Method::PATCH,
            "/api/users/ghost/name",
            Some(json!({ "newUserName": "Nobody" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_store() {
    let t = app();
    let (status, body) = t.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory: healthy");
}
