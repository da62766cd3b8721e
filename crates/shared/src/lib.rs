//! MajooCare Chat Relay shared types
//!
//! Data model, session state machine and persistence shared by the relay server and its tests.

pub mod db;
pub mod error;
pub mod machine;
pub mod store;
pub mod types;

pub use db::{create_pool, run_migrations, PgSessionStore};
pub use error::*;
pub use machine::{apply, Applied, SessionState, Transition, TransitionError};
pub use store::{MemoryStore, SessionStore};
pub use types::*;
