//! Session state machine
//!
//! A session's operational state is three orthogonal components: who handles it (bot or admin),
//! whether it has been escalated to the technical team, and whether it is still open. Every
//! mutation goes through [`apply`], which either yields the next state or rejects the move.

use thiserror::Error;

use crate::types::{Session, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Bot,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    NotEscalated,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub handler: Handler,
    pub escalation: Escalation,
    pub lifecycle: Lifecycle,
}

impl SessionState {
    /// State of a freshly created session
    pub fn initial(is_bot_mode: bool) -> Self {
        Self {
            handler: if is_bot_mode { Handler::Bot } else { Handler::Admin },
            escalation: Escalation::NotEscalated,
            lifecycle: Lifecycle::Open,
        }
    }

    pub fn of(session: &Session) -> Self {
        Self {
            handler: if session.is_bot_mode {
                Handler::Bot
            } else {
                Handler::Admin
            },
            escalation: if session.is_escalated() {
                Escalation::Escalated
            } else {
                Escalation::NotEscalated
            },
            lifecycle: match session.status {
                SessionStatus::Active => Lifecycle::Open,
                SessionStatus::Resolved => Lifecycle::Resolved,
            },
        }
    }

    pub fn is_bot_mode(&self) -> bool {
        self.handler == Handler::Bot
    }
}

/// A requested state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Admin flips between bot and admin handling
    ToggleMode,
    /// Explicit mode request from a webhook or the Telegram bridge
    SetMode { bot: bool },
    /// The bot signalled it cannot answer
    BotAutoEscalate,
    /// The bot bridge failed outright
    BotFailure,
    Resolve,
    EscalateToTech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Session is resolved")]
    SessionResolved,
}

/// Result of a legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub next: SessionState,
    /// False when the transition was legal but left the state untouched
    pub changed: bool,
}

impl Applied {
    fn to(current: SessionState, next: SessionState) -> Self {
        Self {
            next,
            changed: next != current,
        }
    }
}

/// The single transition function
pub fn apply(current: SessionState, transition: Transition) -> Result<Applied, TransitionError> {
    let resolved = current.lifecycle == Lifecycle::Resolved;

    match transition {
        Transition::Resolve => {
            let next = SessionState {
                handler: Handler::Bot,
                lifecycle: Lifecycle::Resolved,
                ..current
            };
            if resolved {
                return Ok(Applied::to(current, current));
            }
            Ok(Applied::to(current, next))
        }
        _ if resolved => Err(TransitionError::SessionResolved),
        Transition::ToggleMode => {
            let handler = match current.handler {
                Handler::Bot => Handler::Admin,
                Handler::Admin => Handler::Bot,
            };
            Ok(Applied::to(current, SessionState { handler, ..current }))
        }
        Transition::SetMode { bot } => {
            let handler = if bot { Handler::Bot } else { Handler::Admin };
            Ok(Applied::to(current, SessionState { handler, ..current }))
        }
        Transition::BotAutoEscalate | Transition::BotFailure => Ok(Applied::to(
            current,
            SessionState {
                handler: Handler::Admin,
                ..current
            },
        )),
        Transition::EscalateToTech => Ok(Applied::to(
            current,
            SessionState {
                escalation: Escalation::Escalated,
                ..current
            },
        )),
    }
}
