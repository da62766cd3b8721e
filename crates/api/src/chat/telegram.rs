//! Telegram conversations
//!
//! Telegram users are identified by their chat id, which becomes the session's party identity.
//! Replies flow back through the outbound webhook.

use chatrelay_shared::{
    apply, Message, NewMessage, NewSession, PartyId, SenderRole, Session, SessionId,
    SessionState, Transition,
};
use serde::Deserialize;

use super::bot::BotTurn;
use super::sessions::validate_body;
use super::{mode_note, ChatRelay};
use crate::bridges::{BridgeError, TelegramForward};
use crate::error::{ApiError, ApiResult};
use crate::routing::fanout::{external_reply_audience, new_session_audience};
use crate::websocket::events::ServerEvent;

/// Used when an inbound update carries no text at all
pub const DEFAULT_TELEGRAM_GREETING: &str = "Halo, saya ingin berbicara dengan MajooCare.";

/// Sent to the Telegram user when the bot bridge fails
pub const TELEGRAM_BOT_APOLOGY: &str =
    "Maaf, terjadi error dengan chatbot. Kamu akan dihubungkan dengan admin kami.";

/// Mode hint on inbound updates. Anything but `bot` means a human handles the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelegramMode {
    #[default]
    Bot,
    Admin,
    Telegram,
}

impl TelegramMode {
    pub fn is_bot(self) -> bool {
        self == TelegramMode::Bot
    }
}

/// An update from the Telegram side
#[derive(Debug, Clone, Default)]
pub struct TelegramInbound {
    pub chat_id: String,
    pub session_id: Option<SessionId>,
    pub username: Option<String>,
    pub message: Option<String>,
    pub message_user: Option<String>,
    /// Text MajooCare already sent on the Telegram side
    pub message_majoo: Option<String>,
    pub mode: TelegramMode,
}

impl TelegramInbound {
    fn user_text(&self) -> String {
        [&self.message_user, &self.message]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TELEGRAM_GREETING.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TelegramInboundOutcome {
    pub session: Session,
    /// The bot reply, the hand-off notice, or the user's own message when the bot did not run
    pub message: Message,
}

/// An agent reply bound for a Telegram user
#[derive(Debug, Clone)]
pub struct TelegramReply {
    pub session_id: SessionId,
    pub message: String,
    pub sender: SenderRole,
}

impl ChatRelay {
    /// Record an inbound Telegram update, finding or opening the chat's session, and let the
    /// bot answer when the session is in bot mode.
    pub async fn telegram_inbound(
        &self,
        inbound: TelegramInbound,
    ) -> ApiResult<TelegramInboundOutcome> {
        let chat_id = inbound.chat_id.trim().to_string();
        if chat_id.is_empty() {
            return Err(ApiError::Validation("chat_id is required".to_string()));
        }
        let is_bot = inbound.mode.is_bot();
        let user_text = inbound.user_text();
        validate_body(&user_text)?;

        let session = self.find_or_open_telegram_session(&inbound, &chat_id).await?;
        let id = session.id;

        let (session, user_message) = {
            let _guard = self.locks.acquire(id).await;
            let mut session = self.require_session(id).await?;

            if session.is_active() && session.is_bot_mode != is_bot {
                let applied = apply(SessionState::of(&session), Transition::SetMode { bot: is_bot })?;
                if applied.changed {
                    let (updated, _) = self
                        .switch_mode(&session, is_bot, &mode_note(is_bot, Some("Telegram")))
                        .await?;
                    session = updated;
                }
            }

            let user_message = self
                .append_and_fan_out(
                    &session.user_id,
                    NewMessage::new(id, SenderRole::User, user_text.as_str()),
                )
                .await?;

            if let Some(majoo) = inbound.message_majoo.as_deref().filter(|m| !m.trim().is_empty()) {
                let sender = if is_bot {
                    SenderRole::Bot
                } else {
                    SenderRole::Admin
                };
                self.append_and_deliver(
                    NewMessage::new(id, sender, majoo),
                    &external_reply_audience(&session.user_id),
                )
                .await?;
            }

            (session, user_message)
        };

        if !(session.is_active() && session.is_bot_mode) {
            return Ok(TelegramInboundOutcome {
                session,
                message: user_message,
            });
        }

        let turn = self.run_bot_turn(&session, &user_message.message).await?;
        let (forward, message) = match turn {
            BotTurn::Replied { message, .. } => (
                TelegramForward {
                    chat_id: chat_id.clone(),
                    message_user: user_text,
                    message_majoo: message.message.clone(),
                    sender: SenderRole::Bot,
                    mode: TelegramForward::mode_label(true),
                },
                message,
            ),
            BotTurn::Failed { notice } => (
                TelegramForward {
                    chat_id: chat_id.clone(),
                    message_user: user_text,
                    message_majoo: TELEGRAM_BOT_APOLOGY.to_string(),
                    sender: SenderRole::System,
                    mode: TelegramForward::mode_label(false),
                },
                notice.unwrap_or(user_message),
            ),
        };
        self.forward_to_telegram(&forward).await;

        Ok(TelegramInboundOutcome {
            session: self.require_session(id).await?,
            message,
        })
    }

    async fn find_or_open_telegram_session(
        &self,
        inbound: &TelegramInbound,
        chat_id: &str,
    ) -> ApiResult<Session> {
        if let Some(id) = inbound.session_id {
            return self.require_session(id).await;
        }

        let party = PartyId::from(chat_id);
        // Two first updates from one chat must not open two sessions
        let _guard = self.party_locks.acquire(party.clone()).await;
        if let Some(active) = self
            .store
            .sessions_for_party(&party)
            .await?
            .into_iter()
            .find(Session::is_active)
        {
            return Ok(active);
        }

        let user_name = inbound
            .username
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Telegram User {chat_id}"));

        let session = self
            .store
            .create_session(NewSession {
                user_id: party,
                user_name,
                is_bot_mode: inbound.mode.is_bot(),
            })
            .await?;

        tracing::info!(session_id = %session.id, chat_id, "Telegram session opened");

        let event = ServerEvent::NewSession {
            session: session.clone(),
            message: None,
        };
        self.router.deliver(&new_session_audience(), &event).await;
        Ok(session)
    }

    /// Record an agent reply and pass it on to Telegram when the session belongs to a chat id
    pub async fn telegram_reply(&self, reply: TelegramReply) -> ApiResult<Message> {
        if !matches!(reply.sender, SenderRole::Admin | SenderRole::Tech) {
            return Err(ApiError::Validation(
                "sender must be admin or tech".to_string(),
            ));
        }
        validate_body(&reply.message)?;

        let (session, message) = {
            let _guard = self.locks.acquire(reply.session_id).await;
            let session = self.require_session(reply.session_id).await?;
            let message = self
                .append_and_fan_out(
                    &session.user_id,
                    NewMessage::new(session.id, reply.sender, reply.message),
                )
                .await?;
            (session, message)
        };

        if session.user_id.is_external_chat_id() {
            self.forward_to_telegram(&TelegramForward {
                chat_id: session.user_id.to_string(),
                message_user: String::new(),
                message_majoo: message.message.clone(),
                sender: reply.sender,
                mode: TelegramForward::mode_label(session.is_bot_mode),
            })
            .await;
        }

        Ok(message)
    }

    /// Forwarding is best effort: failures are logged, never surfaced
    async fn forward_to_telegram(&self, payload: &TelegramForward) {
        match self.bridges.telegram.forward(payload).await {
            Ok(()) => {}
            Err(BridgeError::Disabled(_)) => {
                tracing::debug!(chat_id = %payload.chat_id, "Telegram webhook not configured, reply not forwarded");
            }
            Err(e) => {
                tracing::warn!(chat_id = %payload.chat_id, error = %e, "Failed to forward reply to Telegram");
            }
        }
    }
}
