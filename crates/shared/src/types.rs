//! Common types used across the chat relay

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseEnumError;

/// Cache bucket for admin-bound events when no admin is connected at all
pub const ADMIN_FALLBACK_BUCKET: &str = "admin-default";

/// Cache bucket for tech-bound events when no tech agent is connected at all
pub const TECH_FALLBACK_BUCKET: &str = "tech-support-default";

// =============================================================================
// ID Wrappers
// =============================================================================

/// Session ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Message ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Party Identity
// =============================================================================

/// Opaque identity of one participant (end user, admin, tech agent or external chat)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Role implied by the identity prefix
    pub fn role(&self) -> Role {
        Role::infer(&self.0)
    }

    /// True when the identity looks like a Telegram chat id (numeric, or a negative group id)
    pub fn is_external_chat_id(&self) -> bool {
        let id = self.0.trim();
        if id.starts_with('-') {
            return true;
        }
        !id.is_empty() && id.parse::<f64>().map(f64::is_finite).unwrap_or(false)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(identity: &str) -> Self {
        Self(identity.to_string())
    }
}

impl From<String> for PartyId {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

impl AsRef<str> for PartyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Role of a connected party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Tech,
}

impl Role {
    /// Total, pure prefix inference: `admin*` is an admin, `tech*` a tech agent, anything else a user.
    pub fn infer(identity: &str) -> Role {
        if identity.starts_with("admin") {
            Role::Admin
        } else if identity.starts_with("tech") {
            Role::Tech
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Tech => "tech",
        }
    }

    /// Cache bucket used when no member of this role is connected
    pub fn fallback_bucket(&self) -> Option<PartyId> {
        match self {
            Role::User => None,
            Role::Admin => Some(PartyId::from(ADMIN_FALLBACK_BUCKET)),
            Role::Tech => Some(PartyId::from(TECH_FALLBACK_BUCKET)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author tag of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Bot,
    Admin,
    Tech,
    System,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Bot => "bot",
            SenderRole::Admin => "admin",
            SenderRole::Tech => "tech",
            SenderRole::System => "system",
        }
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SenderRole::User),
            "bot" => Ok(SenderRole::Bot),
            "admin" => Ok(SenderRole::Admin),
            "tech" => Ok(SenderRole::Tech),
            "system" => Ok(SenderRole::System),
            other => Err(ParseEnumError::new("sender role", other)),
        }
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Resolved,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "resolved" => Ok(SessionStatus::Resolved),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Reference to a task created in the ticketing system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: String,
    pub url: String,
}

/// Record of a session's escalation to the technical team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechEscalation {
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub escalated_at: OffsetDateTime,
    pub ticket: Option<TicketRef>,
}

/// One end user's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: PartyId,
    pub user_name: String,
    pub is_bot_mode: bool,
    pub status: SessionStatus,
    pub tech_escalation: Option<TechEscalation>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_escalated(&self) -> bool {
        self.tech_escalation.is_some()
    }
}

/// Input for session creation
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: PartyId,
    pub user_name: String,
    pub is_bot_mode: bool,
}

/// One utterance within a session, immutable once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender: SenderRole,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for message creation
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub sender: SenderRole,
    pub message: String,
}

impl NewMessage {
    pub fn new(session_id: SessionId, sender: SenderRole, message: impl Into<String>) -> Self {
        Self {
            session_id,
            sender,
            message: message.into(),
        }
    }

    /// Synthetic annotation emitted by the relay itself
    pub fn system(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::new(session_id, SenderRole::System, message)
    }
}
