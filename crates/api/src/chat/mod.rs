//! Chat relay service
//!
//! [`ChatRelay`] owns the session store, the fan-out router and the outbound bridges. Every
//! HTTP operation is a method on it. Mutating operations hold the session's lock across the
//! state transition, persistence and fan-out, so concurrent writers to one session are applied
//! one after another. Bridge calls that may block for seconds run outside the lock.
//! Finding or opening a Telegram chat's session is serialized per chat id.

mod bot;
mod locks;
mod sessions;
mod telegram;

use std::sync::Arc;

use chatrelay_shared::{
    Message, NewMessage, PartyId, Session, SessionId, SessionStore,
};

pub use bot::{BotTurn, ChatbotReply, ChatbotRequest};
pub use locks::{KeyedLocks, PartyLocks, SessionLocks};
pub use sessions::{
    EscalationOutcome, ModeOutcome, NewChat, MAX_MESSAGE_LEN, MIN_ESCALATION_REASON_LEN,
    MIN_PARTY_ID_LEN,
};
pub use telegram::{TelegramInbound, TelegramInboundOutcome, TelegramMode, TelegramReply};

use crate::bridges::{
    BotClient, BridgeResult, ClickUpTicketing, EscalationDetector, HttpBotClient, TelegramClient,
    TicketingClient, WebhookTelegramClient,
};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::routing::fanout::{message_audience, mode_change_audience, Audience};
use crate::routing::FanoutRouter;
use crate::websocket::events::ServerEvent;

/// Relay behaviour that comes from configuration
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub welcome_message: String,
    pub bot_branch_id: String,
    pub escalation_phrases: Vec<String>,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            welcome_message: config.welcome_message.clone(),
            bot_branch_id: config.bot_branch_id.clone(),
            escalation_phrases: config.escalation_phrases.clone(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The external collaborators
#[derive(Clone)]
pub struct Bridges {
    pub bot: Arc<dyn BotClient>,
    pub ticketing: Arc<dyn TicketingClient>,
    pub telegram: Arc<dyn TelegramClient>,
}

impl Bridges {
    /// HTTP implementations. Unconfigured bridges fail every call with `Disabled`.
    pub fn from_config(config: &Config) -> BridgeResult<Self> {
        Ok(Self {
            bot: Arc::new(HttpBotClient::new(
                config.bot_api_url.clone(),
                config.bot_request_timeout(),
            )?),
            ticketing: Arc::new(ClickUpTicketing::new(config.ticketing.clone())?),
            telegram: Arc::new(WebhookTelegramClient::new(
                config.telegram_webhook_url.clone(),
            )?),
        })
    }
}

pub struct ChatRelay {
    store: Arc<dyn SessionStore>,
    router: FanoutRouter,
    bridges: Bridges,
    detector: EscalationDetector,
    settings: RelaySettings,
    locks: SessionLocks,
    party_locks: PartyLocks,
}

impl ChatRelay {
    pub fn new(
        store: Arc<dyn SessionStore>,
        router: FanoutRouter,
        bridges: Bridges,
        settings: RelaySettings,
    ) -> Self {
        let detector = EscalationDetector::new(&settings.escalation_phrases);
        Self {
            store,
            router,
            bridges,
            detector,
            settings,
            locks: SessionLocks::new(),
            party_locks: PartyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn router(&self) -> &FanoutRouter {
        &self.router
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    async fn require_session(&self, id: SessionId) -> ApiResult<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(ApiError::session_not_found)
    }

    /// Persist a message and push `new_message` to the audience its author implies
    async fn append_and_fan_out(&self, owner: &PartyId, new: NewMessage) -> ApiResult<Message> {
        let audience = message_audience(owner, new.sender);
        self.append_and_deliver(new, &audience).await
    }

    async fn append_and_deliver(&self, new: NewMessage, audience: &[Audience]) -> ApiResult<Message> {
        let message = self.store.append_message(new).await?;
        let event = ServerEvent::NewMessage {
            session_id: message.session_id,
            message: message.clone(),
        };
        self.router.deliver(audience, &event).await;
        Ok(message)
    }

    /// Persist a mode change with its system note and notify the owner and admins.
    /// Callers have already decided through the state machine that the change is legal.
    async fn switch_mode(
        &self,
        session: &Session,
        is_bot_mode: bool,
        note: &str,
    ) -> ApiResult<(Session, Message)> {
        let updated = self.store.update_mode(session.id, is_bot_mode).await?;
        let message = self
            .store
            .append_message(NewMessage::system(session.id, note))
            .await?;

        tracing::info!(
            session_id = %session.id,
            is_bot_mode,
            note,
            "Session mode changed"
        );

        let event = ServerEvent::ModeChanged {
            session_id: session.id,
            is_bot_mode,
            message: message.clone(),
        };
        self.router
            .deliver(&mode_change_audience(&session.user_id), &event)
            .await;
        Ok((updated, message))
    }
}

/// "Switched to bot mode", "Switched to admin mode (via webhook)", ...
fn mode_note(is_bot_mode: bool, suffix: Option<&str>) -> String {
    let mode = if is_bot_mode { "bot" } else { "admin" };
    match suffix {
        Some(via) => format!("Switched to {mode} mode (via {via})"),
        None => format!("Switched to {mode} mode"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted bridges for exercising the relay without network access

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chatrelay_shared::{MemoryStore, NewSession, StoreResult, TechEscalation, TicketRef};
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::bridges::{BotReply, BridgeError, TelegramForward, TicketRequest};
    use crate::routing::DeliveryCache;
    use crate::websocket::registry::ConnectionRegistry;

    /// Replies with queued answers, failing once the queue is empty
    #[derive(Default)]
    pub struct ScriptedBot {
        pub replies: Mutex<VecDeque<BridgeResult<BotReply>>>,
        pub calls: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedBot {
        pub fn answering(text: &str, needs_human_help: bool) -> Self {
            let bot = Self::default();
            bot.push_reply(text, needs_human_help);
            bot
        }

        pub fn push_reply(&self, text: &str, needs_human_help: bool) {
            if let Ok(mut replies) = self.replies.lock() {
                replies.push_back(Ok(BotReply::from_json(
                    json!({ "message": text, "needsHumanHelp": needs_human_help }),
                )));
            }
        }
    }

    #[async_trait]
    impl BotClient for ScriptedBot {
        async fn invoke(&self, name: &str, message: &str, branch_id: &str) -> BridgeResult<BotReply> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((name.to_string(), message.to_string(), branch_id.to_string()));
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or(Err(BridgeError::Disabled("bot")))
        }
    }

    #[derive(Default)]
    pub struct RecordingTicketing {
        pub ticket: Option<TicketRef>,
        pub requests: Mutex<Vec<TicketRequest>>,
    }

    #[async_trait]
    impl TicketingClient for RecordingTicketing {
        async fn create_ticket(&self, request: &TicketRequest) -> BridgeResult<TicketRef> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            self.ticket
                .clone()
                .ok_or(BridgeError::Disabled("ticketing"))
        }
    }

    #[derive(Default)]
    pub struct RecordingTelegram {
        pub forwarded: Mutex<Vec<TelegramForward>>,
    }

    #[async_trait]
    impl TelegramClient for RecordingTelegram {
        async fn forward(&self, payload: &TelegramForward) -> BridgeResult<()> {
            if let Ok(mut forwarded) = self.forwarded.lock() {
                forwarded.push(payload.clone());
            }
            Ok(())
        }
    }

    pub struct Harness {
        pub relay: ChatRelay,
        pub bot: Arc<ScriptedBot>,
        pub ticketing: Arc<RecordingTicketing>,
        pub telegram: Arc<RecordingTelegram>,
    }

    /// Ticketing that blocks until released, for observing work done meanwhile
    pub struct GatedTicketing {
        pub ticket: TicketRef,
        pub started: Notify,
        pub release: Notify,
    }

    impl GatedTicketing {
        pub fn new(ticket: TicketRef) -> Self {
            Self {
                ticket,
                started: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl TicketingClient for GatedTicketing {
        async fn create_ticket(&self, _request: &TicketRequest) -> BridgeResult<TicketRef> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(self.ticket.clone())
        }
    }

    /// Memory store that yields after every party lookup, widening check-then-create windows
    #[derive(Default)]
    pub struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionStore for YieldingStore {
        async fn create_session(&self, new: NewSession) -> StoreResult<Session> {
            self.inner.create_session(new).await
        }

        async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
            self.inner.get_session(id).await
        }

        async fn sessions_for_party(&self, user_id: &PartyId) -> StoreResult<Vec<Session>> {
            let sessions = self.inner.sessions_for_party(user_id).await;
            tokio::task::yield_now().await;
            sessions
        }

        async fn active_sessions(&self) -> StoreResult<Vec<Session>> {
            self.inner.active_sessions().await
        }

        async fn update_mode(&self, id: SessionId, is_bot_mode: bool) -> StoreResult<Session> {
            self.inner.update_mode(id, is_bot_mode).await
        }

        async fn resolve_session(&self, id: SessionId) -> StoreResult<Session> {
            self.inner.resolve_session(id).await
        }

        async fn record_escalation(
            &self,
            id: SessionId,
            escalation: TechEscalation,
        ) -> StoreResult<Session> {
            self.inner.record_escalation(id, escalation).await
        }

        async fn rename_party(&self, user_id: &PartyId, user_name: &str) -> StoreResult<u64> {
            self.inner.rename_party(user_id, user_name).await
        }

        async fn append_message(&self, new: NewMessage) -> StoreResult<Message> {
            self.inner.append_message(new).await
        }

        async fn messages_for_session(&self, id: SessionId) -> StoreResult<Vec<Message>> {
            self.inner.messages_for_session(id).await
        }

        fn kind(&self) -> &'static str {
            "yielding"
        }
    }

    /// A relay over the given store and ticketing, with a failing bot
    pub fn relay_with(
        store: Arc<dyn SessionStore>,
        ticketing: Arc<dyn TicketingClient>,
    ) -> (ChatRelay, Arc<RecordingTelegram>) {
        let telegram = Arc::new(RecordingTelegram::default());
        let relay = build(store, Arc::new(ScriptedBot::default()), ticketing, telegram.clone());
        (relay, telegram)
    }

    fn build(
        store: Arc<dyn SessionStore>,
        bot: Arc<dyn BotClient>,
        ticketing: Arc<dyn TicketingClient>,
        telegram: Arc<dyn TelegramClient>,
    ) -> ChatRelay {
        let router = FanoutRouter::new(ConnectionRegistry::new(), Arc::new(DeliveryCache::new()));
        ChatRelay::new(
            store,
            router,
            Bridges {
                bot,
                ticketing,
                telegram,
            },
            RelaySettings::default(),
        )
    }

    pub fn harness(bot: ScriptedBot, ticketing: RecordingTicketing) -> Harness {
        let bot = Arc::new(bot);
        let ticketing = Arc::new(ticketing);
        let telegram = Arc::new(RecordingTelegram::default());
        let relay = build(
            Arc::new(MemoryStore::new()),
            bot.clone(),
            ticketing.clone(),
            telegram.clone(),
        );
        Harness {
            relay,
            bot,
            ticketing,
            telegram,
        }
    }
}
