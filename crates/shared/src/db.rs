//! Database utilities and the Postgres-backed session store

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::store::SessionStore;
use crate::types::{
    Message, MessageId, NewMessage, NewSession, PartyId, SenderRole, Session, SessionId,
    SessionStatus, TechEscalation, TicketRef,
};

/// Create a database connection pool
/// Note: Disables statement cache for PgBouncer compatibility
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

// =============================================================================
// Rows
// =============================================================================

const SESSION_COLUMNS: &str = "id, user_id, user_name, is_bot_mode, status, escalation_reason, \
     escalated_at, ticket_id, ticket_url, created_at, updated_at";

#[derive(Debug, FromRow)]
struct SessionRow {
    id: i64,
    user_id: String,
    user_name: String,
    is_bot_mode: bool,
    status: String,
    escalation_reason: Option<String>,
    escalated_at: Option<OffsetDateTime>,
    ticket_id: Option<String>,
    ticket_url: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let ticket = match (row.ticket_id, row.ticket_url) {
            (Some(id), Some(url)) => Some(TicketRef { id, url }),
            _ => None,
        };
        let tech_escalation = match (row.escalation_reason, row.escalated_at) {
            (Some(reason), Some(escalated_at)) => Some(TechEscalation {
                reason,
                escalated_at,
                ticket,
            }),
            _ => None,
        };

        Ok(Session {
            id: SessionId(row.id),
            user_id: PartyId::new(row.user_id),
            user_name: row.user_name,
            is_bot_mode: row.is_bot_mode,
            status: SessionStatus::from_str(&row.status)?,
            tech_escalation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    session_id: i64,
    sender: String,
    message: String,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId(row.id),
            session_id: SessionId(row.session_id),
            sender: SenderRole::from_str(&row.sender)?,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

fn into_sessions(rows: Vec<SessionRow>) -> StoreResult<Vec<Session>> {
    rows.into_iter().map(Session::try_from).collect()
}

// =============================================================================
// Store
// =============================================================================

/// Postgres-backed [`SessionStore`]
///
/// `updated_at` is advanced with `GREATEST(clock_timestamp(), updated_at + 1µs)` so that
/// successive writes to a session always order strictly.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_required(&self, query: String, id: SessionId) -> StoreResult<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::SessionNotFound(id))?.try_into()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, new: NewSession) -> StoreResult<Session> {
        let row: SessionRow = sqlx::query_as(&format!(
            "INSERT INTO chat_sessions (user_id, user_name, is_bot_mode, status) \
             VALUES ($1, $2, $3, 'active') RETURNING {SESSION_COLUMNS}"
        ))
        .bind(new.user_id.as_str())
        .bind(&new.user_name)
        .bind(new.is_bot_mode)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(session_id = row.id, user_id = %new.user_id, "Session created");
        row.try_into()
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn sessions_for_party(&self, user_id: &PartyId) -> StoreResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = $1 \
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_sessions(rows)
    }

    async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE status = 'active' \
             ORDER BY updated_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_sessions(rows)
    }

    async fn update_mode(&self, id: SessionId, is_bot_mode: bool) -> StoreResult<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE chat_sessions SET is_bot_mode = $2, \
             updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond') \
             WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id.0)
        .bind(is_bot_mode)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::SessionNotFound(id))?.try_into()
    }

    async fn resolve_session(&self, id: SessionId) -> StoreResult<Session> {
        self.fetch_required(
            format!(
                "UPDATE chat_sessions SET status = 'resolved', is_bot_mode = TRUE, \
                 updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond') \
                 WHERE id = $1 RETURNING {SESSION_COLUMNS}"
            ),
            id,
        )
        .await
    }

    async fn record_escalation(
        &self,
        id: SessionId,
        escalation: TechEscalation,
    ) -> StoreResult<Session> {
        let (ticket_id, ticket_url) = match escalation.ticket {
            Some(ticket) => (Some(ticket.id), Some(ticket.url)),
            None => (None, None),
        };

        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE chat_sessions SET escalation_reason = $2, escalated_at = $3, \
             ticket_id = $4, ticket_url = $5, \
             updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond') \
             WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id.0)
        .bind(&escalation.reason)
        .bind(escalation.escalated_at)
        .bind(ticket_id)
        .bind(ticket_url)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::SessionNotFound(id))?.try_into()
    }

    async fn rename_party(&self, user_id: &PartyId, user_name: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET user_name = $2, \
             updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond') \
             WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .bind(user_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the session serializes appends and keeps created_at strictly ordered
        let stamp: Option<(OffsetDateTime,)> = sqlx::query_as(
            "UPDATE chat_sessions \
             SET updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond') \
             WHERE id = $1 RETURNING updated_at",
        )
        .bind(new.session_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let (created_at,) = stamp.ok_or(StoreError::SessionNotFound(new.session_id))?;

        let row: MessageRow = sqlx::query_as(
            "INSERT INTO chat_messages (session_id, sender, message, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, session_id, sender, message, created_at",
        )
        .bind(new.session_id.0)
        .bind(new.sender.as_str())
        .bind(&new.message)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn messages_for_session(&self, id: SessionId) -> StoreResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, session_id, sender, message, created_at FROM chat_messages \
             WHERE session_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
