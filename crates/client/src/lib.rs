//! Real-time client for the chat relay websocket
//!
//! [`RelayClient`] keeps one connection to `/ws?userId=<identity>` alive, publishes every inbound
//! event frame on a broadcast channel and reconnects with jittered exponential backoff.

pub mod backoff;
pub mod client;
pub mod error;

pub use backoff::ReconnectPolicy;
pub use client::{ConnectionState, InboundFrame, RelayClient, RelayConfig};
pub use error::{ClientError, ClientResult};
