//! Session lifecycle operations

use chatrelay_shared::{
    apply, Message, NewMessage, NewSession, PartyId, Role, SenderRole, Session, SessionId,
    SessionState, TechEscalation, TicketRef, Transition,
};
use time::OffsetDateTime;

use super::{mode_note, ChatRelay};
use crate::bridges::TicketRequest;
use crate::error::{ApiError, ApiResult};
use crate::routing::fanout::{
    message_audience, new_session_audience, resolution_audience, Audience,
};
use crate::websocket::events::ServerEvent;

pub const MIN_PARTY_ID_LEN: usize = 3;
pub const MAX_MESSAGE_LEN: usize = 50_000;
pub const MIN_ESCALATION_REASON_LEN: usize = 5;

/// Input for opening a session
#[derive(Debug, Clone)]
pub struct NewChat {
    pub user_id: String,
    pub user_name: String,
    /// Defaults to bot handling
    pub is_bot_mode: Option<bool>,
}

/// Result of a mode request. `message` is `None` when the session was already in that mode.
#[derive(Debug, Clone)]
pub struct ModeOutcome {
    pub session: Session,
    pub message: Option<Message>,
}

#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    pub session: Session,
    pub ticket: Option<TicketRef>,
    /// True when the session had been escalated before this call
    pub already_escalated: bool,
}

pub(super) fn validate_body(body: &str) -> ApiResult<()> {
    if body.trim().is_empty() {
        return Err(ApiError::Validation("Message must not be empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation(format!(
            "Message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(())
}

impl ChatRelay {
    /// Open a session, greet the user and tell the admins
    pub async fn create_session(&self, new: NewChat) -> ApiResult<Session> {
        let user_id = new.user_id.trim();
        if user_id.chars().count() < MIN_PARTY_ID_LEN {
            return Err(ApiError::Validation(format!(
                "userId must be at least {MIN_PARTY_ID_LEN} characters"
            )));
        }
        if new.user_name.trim().is_empty() {
            return Err(ApiError::Validation("userName must not be empty".to_string()));
        }

        let session = self
            .store
            .create_session(NewSession {
                user_id: PartyId::from(user_id),
                user_name: new.user_name.trim().to_string(),
                is_bot_mode: new.is_bot_mode.unwrap_or(true),
            })
            .await?;

        let _guard = self.locks.acquire(session.id).await;
        let welcome = self
            .store
            .append_message(NewMessage::new(
                session.id,
                SenderRole::Bot,
                self.settings.welcome_message.as_str(),
            ))
            .await?;
        // The welcome message bumped updated_at
        let session = self.require_session(session.id).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            is_bot_mode = session.is_bot_mode,
            "Chat session created"
        );

        let event = ServerEvent::NewSession {
            session: session.clone(),
            message: Some(welcome),
        };
        self.router.deliver(&new_session_audience(), &event).await;
        Ok(session)
    }

    /// A party's sessions, or every active session when no party is given
    pub async fn list_sessions(&self, party: Option<&PartyId>) -> ApiResult<Vec<Session>> {
        let sessions = match party {
            Some(party) => self.store.sessions_for_party(party).await?,
            None => self.store.active_sessions().await?,
        };
        Ok(sessions)
    }

    pub async fn get_session(&self, id: SessionId) -> ApiResult<Session> {
        self.require_session(id).await
    }

    pub async fn list_messages(&self, id: SessionId) -> ApiResult<Vec<Message>> {
        self.require_session(id).await?;
        Ok(self.store.messages_for_session(id).await?)
    }

    /// Append a message from any participant.
    ///
    /// A `user` message on an active bot-mode session is answered by the bot before returning.
    pub async fn post_message(
        &self,
        id: SessionId,
        sender: SenderRole,
        body: String,
    ) -> ApiResult<Message> {
        validate_body(&body)?;

        let (session, message) = {
            let _guard = self.locks.acquire(id).await;
            let session = self.require_session(id).await?;
            let message = self
                .append_and_fan_out(&session.user_id, NewMessage::new(id, sender, body))
                .await?;
            (session, message)
        };

        tracing::debug!(session_id = %id, sender = %sender, message_id = %message.id, "Message appended");

        if sender == SenderRole::User && session.is_active() && session.is_bot_mode {
            if let Err(e) = self.run_bot_turn(&session, &message.message).await {
                tracing::error!(session_id = %id, error = %e, "Bot turn failed after user message");
            }
        }

        Ok(message)
    }

    /// Flip between bot and admin handling
    pub async fn toggle_mode(&self, id: SessionId) -> ApiResult<ModeOutcome> {
        self.request_mode(id, Transition::ToggleMode, None).await
    }

    /// Mode request from an external system. `bot = false` hands the session to an admin.
    pub async fn set_mode_via_webhook(&self, id: SessionId, bot: bool) -> ApiResult<ModeOutcome> {
        self.request_mode(id, Transition::SetMode { bot }, Some("webhook"))
            .await
    }

    async fn request_mode(
        &self,
        id: SessionId,
        transition: Transition,
        via: Option<&str>,
    ) -> ApiResult<ModeOutcome> {
        let _guard = self.locks.acquire(id).await;
        let session = self.require_session(id).await?;

        let applied = apply(SessionState::of(&session), transition).map_err(|e| {
            tracing::warn!(session_id = %id, ?transition, "Mode change rejected: {}", e);
            e
        })?;
        if !applied.changed {
            return Ok(ModeOutcome {
                session,
                message: None,
            });
        }

        let is_bot_mode = applied.next.is_bot_mode();
        let (session, message) = self
            .switch_mode(&session, is_bot_mode, &mode_note(is_bot_mode, via))
            .await?;
        Ok(ModeOutcome {
            session,
            message: Some(message),
        })
    }

    /// Close a session. Resolving twice is a silent no-op.
    pub async fn resolve(&self, id: SessionId) -> ApiResult<Session> {
        let _guard = self.locks.acquire(id).await;
        let session = self.require_session(id).await?;

        let applied = apply(SessionState::of(&session), Transition::Resolve)?;
        if !applied.changed {
            tracing::debug!(session_id = %id, "Session already resolved");
            return Ok(session);
        }

        let session = self.store.resolve_session(id).await?;
        let message = self
            .store
            .append_message(NewMessage::system(id, "Chat marked as resolved"))
            .await?;

        tracing::info!(session_id = %id, "Session resolved");

        let event = ServerEvent::SessionResolved {
            session_id: id,
            message,
        };
        self.router
            .deliver(&resolution_audience(&session.user_id), &event)
            .await;
        Ok(session)
    }

    /// Hand a session to the technical team, opening a ticket when ticketing is configured.
    ///
    /// Escalating an already escalated session changes nothing and returns the existing ticket.
    /// The ticket is created outside the session lock and attached afterwards.
    pub async fn escalate(&self, id: SessionId, reason: &str) -> ApiResult<EscalationOutcome> {
        let reason = reason.trim();
        if reason.chars().count() < MIN_ESCALATION_REASON_LEN {
            return Err(ApiError::Validation(format!(
                "Escalation reason must be at least {MIN_ESCALATION_REASON_LEN} characters"
            )));
        }

        // Record the escalation first so a concurrent escalate sees it and returns early
        let (session, notice, request) = {
            let _guard = self.locks.acquire(id).await;
            let session = self.require_session(id).await?;

            let applied = apply(SessionState::of(&session), Transition::EscalateToTech)?;
            if !applied.changed {
                let ticket = session
                    .tech_escalation
                    .as_ref()
                    .and_then(|e| e.ticket.clone());
                return Ok(EscalationOutcome {
                    session,
                    ticket,
                    already_escalated: true,
                });
            }

            let notice = self
                .store
                .append_message(NewMessage::system(
                    id,
                    format!("Escalated to technical team. Reason: {reason}"),
                ))
                .await?;
            let session = self
                .store
                .record_escalation(
                    id,
                    TechEscalation {
                        reason: reason.to_string(),
                        escalated_at: OffsetDateTime::now_utc(),
                        ticket: None,
                    },
                )
                .await?;

            // The end user sees the notice without ticket details
            self.router
                .deliver(
                    &[Audience::Party(session.user_id.clone())],
                    &ServerEvent::TechEscalation {
                        session_id: id,
                        message: notice.clone(),
                        ticket: None,
                    },
                )
                .await;

            let request = TicketRequest {
                session_id: id,
                user_name: session.user_name.clone(),
                reason: reason.to_string(),
                history: self.store.messages_for_session(id).await?,
            };
            (session, notice, request)
        };

        // The ticketing API may take seconds; other writers to the session proceed meanwhile
        let ticket = match self.bridges.ticketing.create_ticket(&request).await {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Ticket creation failed, escalating without one");
                None
            }
        };

        let _guard = self.locks.acquire(id).await;
        let (session, ticket_note) = match &ticket {
            Some(ticket) => {
                let escalated_at = session
                    .tech_escalation
                    .as_ref()
                    .map_or_else(OffsetDateTime::now_utc, |e| e.escalated_at);
                let session = self
                    .store
                    .record_escalation(
                        id,
                        TechEscalation {
                            reason: reason.to_string(),
                            escalated_at,
                            ticket: Some(ticket.clone()),
                        },
                    )
                    .await?;
                let note = self
                    .store
                    .append_message(NewMessage::system(
                        id,
                        format!("Ticket created: {}", ticket.url),
                    ))
                    .await?;
                (session, Some(note))
            }
            None => (self.require_session(id).await?, None),
        };

        tracing::info!(
            session_id = %id,
            ticket_id = ticket.as_ref().map(|t| t.id.as_str()),
            "Session escalated to technical team"
        );

        self.router
            .deliver(
                &[Audience::Role(Role::Admin)],
                &ServerEvent::TechEscalation {
                    session_id: id,
                    message: notice.clone(),
                    ticket: ticket.clone(),
                },
            )
            .await;
        self.router
            .deliver(
                &[Audience::Role(Role::Tech)],
                &ServerEvent::NewTechIssue {
                    session_id: id,
                    session: session.clone(),
                    message: notice,
                    reason: reason.to_string(),
                    ticket: ticket.clone(),
                },
            )
            .await;

        if let Some(note) = ticket_note {
            let event = ServerEvent::NewMessage {
                session_id: id,
                message: note,
            };
            self.router
                .deliver(
                    &message_audience(&session.user_id, SenderRole::System),
                    &event,
                )
                .await;
        }

        Ok(EscalationOutcome {
            session,
            ticket,
            already_escalated: false,
        })
    }

    /// Change a party's display name on all of its sessions
    pub async fn rename_party(&self, party: &PartyId, new_name: &str) -> ApiResult<Vec<Session>> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(ApiError::Validation("newUserName must not be empty".to_string()));
        }

        let touched = self.store.rename_party(party, new_name).await?;
        if touched == 0 {
            return Err(ApiError::NotFound("Sessions for user"));
        }

        tracing::info!(party = %party, sessions = touched, "Party renamed");
        Ok(self.store.sessions_for_party(party).await?)
    }
}
