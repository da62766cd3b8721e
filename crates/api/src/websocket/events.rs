//! WebSocket event types and serialization
//!
//! Every frame is a JSON object with a `type` discriminator. Field names are camelCase to match
//! the REST payloads.

use chatrelay_shared::{Message, Session, SessionId, TicketRef};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat; carries no business meaning
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A session was opened; sent to admins
    NewSession {
        session: Session,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },

    NewMessage {
        session_id: SessionId,
        message: Message,
    },

    ModeChanged {
        session_id: SessionId,
        is_bot_mode: bool,
        message: Message,
    },

    SessionResolved {
        session_id: SessionId,
        message: Message,
    },

    /// Escalation notice for the end user and admins
    TechEscalation {
        session_id: SessionId,
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket: Option<TicketRef>,
    },

    /// Full escalation payload for the technical team
    NewTechIssue {
        session_id: SessionId,
        session: Session,
        message: Message,
        reason: String,
        ticket: Option<TicketRef>,
    },

    /// Keep-alive
    Ping { timestamp: i64 },
}

impl ServerEvent {
    pub fn ping_now() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        ServerEvent::Ping {
            timestamp: (nanos / 1_000_000) as i64,
        }
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewSession { .. } => "new_session",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::ModeChanged { .. } => "mode_changed",
            ServerEvent::SessionResolved { .. } => "session_resolved",
            ServerEvent::TechEscalation { .. } => "tech_escalation",
            ServerEvent::NewTechIssue { .. } => "new_tech_issue",
            ServerEvent::Ping { .. } => "ping",
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            ServerEvent::NewSession { session, .. } => Some(session.id),
            ServerEvent::NewMessage { session_id, .. }
            | ServerEvent::ModeChanged { session_id, .. }
            | ServerEvent::SessionResolved { session_id, .. }
            | ServerEvent::TechEscalation { session_id, .. }
            | ServerEvent::NewTechIssue { session_id, .. } => Some(*session_id),
            ServerEvent::Ping { .. } => None,
        }
    }

    /// Whether an undeliverable copy is buffered for later.
    /// Message content and tech issues are; status notices are fire-and-forget.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            ServerEvent::NewMessage { .. } | ServerEvent::NewTechIssue { .. }
        )
    }
}
