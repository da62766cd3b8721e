//! Connection registry
//!
//! Maps each party identity to its live connections. An identity whose last connection
//! closes is dropped from the map entirely.

use std::collections::HashMap;
use std::sync::Arc;

use chatrelay_shared::{PartyId, Role};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Per-identity result of a delivery attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTally {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// Map of party -> live connections
    connections: Arc<RwLock<HashMap<PartyId, Vec<Arc<Connection>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its party's set
    pub async fn register(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        let set = connections.entry(conn.party.clone()).or_default();
        set.push(Arc::clone(&conn));
        let party_connections = set.len();

        tracing::info!(
            connection_id = %conn.connection_id,
            party = %conn.party,
            role = %conn.role(),
            party_connections,
            total_parties = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove one connection. Returns false if it was not registered.
    pub async fn unregister(&self, party: &PartyId, connection_id: &Uuid) -> bool {
        let mut connections = self.connections.write().await;
        let Some(set) = connections.get_mut(party) else {
            return false;
        };

        let before = set.len();
        set.retain(|c| c.connection_id != *connection_id);
        let removed = set.len() != before;
        let remaining = set.len();

        if remaining == 0 {
            connections.remove(party);
        }

        if removed {
            tracing::info!(
                connection_id = %connection_id,
                party = %party,
                party_connections = remaining,
                total_parties = connections.len(),
                "WebSocket connection removed"
            );
        }
        removed
    }

    pub async fn connections_for(&self, party: &PartyId) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(party).cloned().unwrap_or_default()
    }

    /// Snapshot of every identity with its connection set
    pub async fn all_identities(&self) -> Vec<(PartyId, Vec<Arc<Connection>>)> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .map(|(party, set)| (party.clone(), set.clone()))
            .collect()
    }

    /// Connected identities whose inferred role is `role`
    pub async fn identities_with_role(&self, role: Role) -> Vec<PartyId> {
        let connections = self.connections.read().await;
        connections
            .keys()
            .filter(|party| party.role() == role)
            .cloned()
            .collect()
    }

    /// Send to every connection of `party`. A failing connection does not stop the rest.
    pub async fn deliver(&self, party: &PartyId, event: &ServerEvent) -> DeliveryTally {
        let conns = self.connections_for(party).await;
        let mut tally = DeliveryTally::default();

        for conn in &conns {
            match conn.send(event.clone()) {
                Ok(()) => tally.sent += 1,
                Err(_) => {
                    tally.failed += 1;
                    tracing::warn!(
                        connection_id = %conn.connection_id,
                        party = %party,
                        event = event.kind(),
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tally
    }

    pub async fn party_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().map(Vec::len).sum()
    }

    /// Drop every connection, used on shutdown
    pub async fn clear(&self) {
        let mut connections = self.connections.write().await;
        let dropped = connections.len();
        connections.clear();
        tracing::info!(parties = dropped, "Connection registry cleared");
    }
}
