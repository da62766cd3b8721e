//! Session and message persistence
//!
//! [`SessionStore`] is the seam between the relay and its storage. [`MemoryStore`] keeps
//! everything in process and is the default; [`crate::db::PgSessionStore`] is used when a
//! database URL is configured.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    Message, MessageId, NewMessage, NewSession, PartyId, Session, SessionId, SessionStatus,
    TechEscalation,
};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an active session. Ids are assigned in strictly increasing order.
    async fn create_session(&self, new: NewSession) -> StoreResult<Session>;

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// All sessions owned by `user_id`, most recently updated first
    async fn sessions_for_party(&self, user_id: &PartyId) -> StoreResult<Vec<Session>>;

    /// Every active session, most recently updated first
    async fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    async fn update_mode(&self, id: SessionId, is_bot_mode: bool) -> StoreResult<Session>;

    /// Mark resolved and hand the session back to the bot
    async fn resolve_session(&self, id: SessionId) -> StoreResult<Session>;

    async fn record_escalation(
        &self,
        id: SessionId,
        escalation: TechEscalation,
    ) -> StoreResult<Session>;

    /// Update the display name on every session owned by `user_id`. Returns the count touched.
    async fn rename_party(&self, user_id: &PartyId, user_name: &str) -> StoreResult<u64>;

    /// Append to a session's history and bump its `updated_at`
    async fn append_message(&self, new: NewMessage) -> StoreResult<Message>;

    /// History in insertion order
    async fn messages_for_session(&self, id: SessionId) -> StoreResult<Vec<Message>>;

    /// Short label used by health reporting
    fn kind(&self) -> &'static str;

    /// Connectivity probe for readiness checks
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<SessionId, Session>,
    messages: BTreeMap<SessionId, Vec<Message>>,
    next_session_id: i64,
    next_message_id: i64,
    last_timestamp: Option<OffsetDateTime>,
}

impl Inner {
    /// Wall clock, nudged forward so no two writes share a timestamp
    fn tick(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let stamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::from_nanos(1),
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }

    fn session_mut(&mut self, id: SessionId) -> StoreResult<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))
    }

    fn touch(&mut self, id: SessionId) -> StoreResult<Session> {
        let now = self.tick();
        let session = self.session_mut(id)?;
        session.updated_at = now;
        Ok(session.clone())
    }
}

/// In-process store. All state lives behind one lock so id and timestamp assignment is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        inner.next_session_id += 1;
        let id = SessionId(inner.next_session_id);
        let now = inner.tick();

        let session = Session {
            id,
            user_id: new.user_id,
            user_name: new.user_name,
            is_bot_mode: new.is_bot_mode,
            status: SessionStatus::Active,
            tech_escalation: None,
            created_at: now,
            updated_at: now,
        };
        inner.sessions.insert(id, session.clone());
        inner.messages.insert(id, Vec::new());

        tracing::debug!(session_id = %id, user_id = %session.user_id, "Session created");
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn sessions_for_party(&self, user_id: &PartyId) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn update_mode(&self, id: SessionId, is_bot_mode: bool) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        inner.session_mut(id)?.is_bot_mode = is_bot_mode;
        inner.touch(id)
    }

    async fn resolve_session(&self, id: SessionId) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.session_mut(id)?;
        session.status = SessionStatus::Resolved;
        session.is_bot_mode = true;
        inner.touch(id)
    }

    async fn record_escalation(
        &self,
        id: SessionId,
        escalation: TechEscalation,
    ) -> StoreResult<Session> {
        let mut inner = self.inner.write().await;
        inner.session_mut(id)?.tech_escalation = Some(escalation);
        inner.touch(id)
    }

    async fn rename_party(&self, user_id: &PartyId, user_name: &str) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let ids: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| &s.user_id == user_id)
            .map(|s| s.id)
            .collect();

        for id in &ids {
            inner.session_mut(*id)?.user_name = user_name.to_string();
            inner.touch(*id)?;
        }
        Ok(ids.len() as u64)
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&new.session_id) {
            return Err(StoreError::SessionNotFound(new.session_id));
        }

        inner.next_message_id += 1;
        let id = MessageId(inner.next_message_id);
        let session = inner.touch(new.session_id)?;

        let message = Message {
            id,
            session_id: new.session_id,
            sender: new.sender,
            message: new.message,
            created_at: session.updated_at,
        };
        inner
            .messages
            .entry(new.session_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn messages_for_session(&self, id: SessionId) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.messages.get(&id).cloned().unwrap_or_default())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
