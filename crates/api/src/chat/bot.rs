//! Bot conversation turns

use chatrelay_shared::{
    apply, Message, NewMessage, SenderRole, Session, SessionId, SessionState, Transition,
};

use super::ChatRelay;
use crate::bridges::BotReply;
use crate::error::{ApiError, ApiResult};

pub(super) const BOT_ESCALATED_NOTE: &str = "Bot escalated to admin support";
pub(super) const BOT_ESCALATED_VIA_API_NOTE: &str = "Bot escalated to admin support via API";
pub(super) const BOT_FAILURE_NOTE: &str = "Bot encountered an error. Transferring to admin.";

/// What came of asking the bot to answer a user
#[derive(Debug, Clone)]
pub enum BotTurn {
    Replied {
        reply: BotReply,
        /// The persisted bot message
        message: Message,
        /// The reply handed the session to an admin
        escalated: bool,
    },
    /// The bridge failed; `notice` is the hand-off note when the session was still in bot mode
    Failed { notice: Option<Message> },
}

/// Direct bot call, optionally recorded against a session
#[derive(Debug, Clone)]
pub struct ChatbotRequest {
    pub name: String,
    pub message: String,
    pub branch_id: Option<String>,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct ChatbotReply {
    pub reply: BotReply,
    pub needs_human_help: bool,
}

impl ChatRelay {
    /// Ask the bot to answer `text` on behalf of `session`'s owner.
    ///
    /// The bridge is called without holding the session lock. The reply and any hand-off are
    /// applied under the lock against a fresh read of the session.
    pub(crate) async fn run_bot_turn(&self, session: &Session, text: &str) -> ApiResult<BotTurn> {
        let outcome = self
            .bridges
            .bot
            .invoke(&session.user_name, text, &self.settings.bot_branch_id)
            .await;

        let _guard = self.locks.acquire(session.id).await;
        let current = self.require_session(session.id).await?;

        match outcome {
            Ok(reply) => {
                let message = self
                    .append_and_fan_out(
                        &current.user_id,
                        NewMessage::new(current.id, SenderRole::Bot, reply.display_text()),
                    )
                    .await?;

                let escalated = if self.detector.needs_human(&reply) {
                    self.hand_off_to_admin(&current, Transition::BotAutoEscalate, BOT_ESCALATED_NOTE)
                        .await?
                        .is_some()
                } else {
                    false
                };

                Ok(BotTurn::Replied {
                    reply,
                    message,
                    escalated,
                })
            }
            Err(e) => {
                tracing::warn!(session_id = %current.id, error = %e, "Bot bridge failed, handing off to admin");
                let notice = self
                    .hand_off_to_admin(&current, Transition::BotFailure, BOT_FAILURE_NOTE)
                    .await?;
                Ok(BotTurn::Failed { notice })
            }
        }
    }

    /// Move a session to admin handling. `None` when there was nothing to change.
    /// Caller holds the session lock.
    async fn hand_off_to_admin(
        &self,
        session: &Session,
        transition: Transition,
        note: &str,
    ) -> ApiResult<Option<Message>> {
        match apply(SessionState::of(session), transition) {
            Ok(applied) if applied.changed => {
                let (_, message) = self
                    .switch_mode(session, applied.next.is_bot_mode(), note)
                    .await?;
                Ok(Some(message))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(session_id = %session.id, ?transition, "Skipping admin hand-off: {}", e);
                Ok(None)
            }
        }
    }

    /// Call the bot directly. With a known session id the reply is recorded and may hand
    /// the session to an admin.
    pub async fn chatbot(&self, request: ChatbotRequest) -> ApiResult<ChatbotReply> {
        if request.name.trim().is_empty() || request.message.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Missing required parameters. Required: name, message".to_string(),
            ));
        }

        let branch_id = request
            .branch_id
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.settings.bot_branch_id.clone());

        let reply = self
            .bridges
            .bot
            .invoke(&request.name, &request.message, &branch_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Chatbot passthrough failed");
                ApiError::Upstream(format!("Failed to process chatbot request: {e}"))
            })?;
        let needs_human_help = self.detector.needs_human(&reply);

        if let Some(id) = request.session_id {
            let _guard = self.locks.acquire(id).await;
            match self.store.get_session(id).await? {
                Some(session) => {
                    self.append_and_fan_out(
                        &session.user_id,
                        NewMessage::new(id, SenderRole::Bot, reply.display_text()),
                    )
                    .await?;
                    if needs_human_help {
                        self.hand_off_to_admin(
                            &session,
                            Transition::BotAutoEscalate,
                            BOT_ESCALATED_VIA_API_NOTE,
                        )
                        .await?;
                    }
                }
                None => {
                    tracing::warn!(session_id = %id, "Chatbot reply for unknown session not recorded");
                }
            }
        }

        Ok(ChatbotReply {
            reply,
            needs_human_help,
        })
    }
}
