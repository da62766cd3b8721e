//! MajooCare Chat Relay API Library
//!
//! HTTP and WebSocket surface of the relay: session routes, the fan-out router with its
//! connection registry and delivery cache, and the bot, ticketing and Telegram bridges.

pub mod bridges;
pub mod chat;
pub mod config;
pub mod error;
pub mod routes;
pub mod routing;
pub mod state;
pub mod websocket;

pub use chat::{Bridges, ChatRelay, RelaySettings};
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use routing::{DeliveryCache, FanoutRouter};
pub use state::AppState;
