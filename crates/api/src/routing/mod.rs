//! Real-time event routing
//!
//! - **Cache**: per-party buffer for events nobody could receive
//! - **Fanout**: recipient resolution and delivery

pub mod cache;
pub mod fanout;

pub use cache::DeliveryCache;
pub use fanout::{Audience, DeliveryReport, FanoutRouter};
