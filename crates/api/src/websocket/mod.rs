//! WebSocket support for real-time chat delivery
//!
//! # Architecture
//!
//! - **Connection**: one live socket belonging to a party identity
//! - **Registry**: party identity -> live connections
//! - **Handler**: Axum upgrade handler and per-socket read/write loops
//! - **Events**: Type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod registry;

pub use handler::ws_handler;
pub use registry::ConnectionRegistry;
