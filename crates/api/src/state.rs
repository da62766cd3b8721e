//! Shared application state

use std::sync::Arc;

use chatrelay_shared::SessionStore;

use crate::chat::{Bridges, ChatRelay, RelaySettings};
use crate::config::Config;
use crate::routing::{DeliveryCache, FanoutRouter};
use crate::websocket::ConnectionRegistry;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<ChatRelay>,
    /// Same router the relay fans out through; websocket upgrades attach here
    pub router: FanoutRouter,
}

impl AppState {
    /// Wire a fresh registry and delivery cache around `store` and `bridges`
    pub fn new(config: Config, store: Arc<dyn SessionStore>, bridges: Bridges) -> Self {
        let cache = Arc::new(DeliveryCache::with_max_age(config.delivery_cache_max_age()));
        let router = FanoutRouter::new(ConnectionRegistry::new(), cache);
        let relay = ChatRelay::new(
            store,
            router.clone(),
            bridges,
            RelaySettings::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            router,
        }
    }
}
