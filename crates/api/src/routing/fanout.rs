//! Fan-out router
//!
//! Resolves the recipients of an event and delivers it through the connection registry,
//! buffering cacheable events for recipients that could not be reached.

use std::collections::HashSet;
use std::sync::Arc;

use chatrelay_shared::{PartyId, Role, SenderRole};

use super::cache::DeliveryCache;
use crate::websocket::connection::Connection;
use crate::websocket::events::ServerEvent;
use crate::websocket::registry::ConnectionRegistry;

/// A recipient group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// One specific identity, typically the session owner
    Party(PartyId),
    /// Every connected identity of a role
    Role(Role),
}

/// Who sees a new message, by author
pub fn message_audience(owner: &PartyId, sender: SenderRole) -> Vec<Audience> {
    match sender {
        SenderRole::User => vec![Audience::Role(Role::Admin), Audience::Role(Role::Tech)],
        SenderRole::Admin => vec![Audience::Party(owner.clone()), Audience::Role(Role::Tech)],
        SenderRole::Tech => vec![
            Audience::Party(owner.clone()),
            Audience::Role(Role::Admin),
            Audience::Role(Role::Tech),
        ],
        SenderRole::Bot | SenderRole::System => {
            vec![Audience::Party(owner.clone()), Audience::Role(Role::Admin)]
        }
    }
}

/// A reply MajooCare wrote on the Telegram side reaches the owner and every admin
pub fn external_reply_audience(owner: &PartyId) -> Vec<Audience> {
    vec![Audience::Party(owner.clone()), Audience::Role(Role::Admin)]
}

pub fn new_session_audience() -> Vec<Audience> {
    vec![Audience::Role(Role::Admin)]
}

pub fn mode_change_audience(owner: &PartyId) -> Vec<Audience> {
    vec![Audience::Party(owner.clone()), Audience::Role(Role::Admin)]
}

pub fn resolution_audience(owner: &PartyId) -> Vec<Audience> {
    vec![
        Audience::Party(owner.clone()),
        Audience::Role(Role::Admin),
        Audience::Role(Role::Tech),
    ]
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Distinct identities targeted
    pub identities: usize,
    /// Successful per-connection sends
    pub delivered: usize,
    /// Failed per-connection sends
    pub failed: usize,
    /// Cache entries written (per identity or role bucket)
    pub cached: usize,
}

#[derive(Clone)]
pub struct FanoutRouter {
    registry: ConnectionRegistry,
    cache: Arc<DeliveryCache>,
}

impl FanoutRouter {
    pub fn new(registry: ConnectionRegistry, cache: Arc<DeliveryCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &DeliveryCache {
        &self.cache
    }

    /// Deliver `event` to every identity in `audiences`, each at most once
    pub async fn deliver(&self, audiences: &[Audience], event: &ServerEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for audience in audiences {
            match audience {
                Audience::Party(party) => {
                    if seen.insert(party.clone()) {
                        targets.push(party.clone());
                    }
                }
                Audience::Role(role) => {
                    let members = self.registry.identities_with_role(*role).await;
                    if members.is_empty() {
                        // Nobody of this role is online: keep it for whoever connects first
                        if event.is_cacheable() {
                            if let Some(bucket) = role.fallback_bucket() {
                                self.cache.enqueue(&bucket, event.clone());
                                report.cached += 1;
                            }
                        }
                        tracing::debug!(role = %role, event = event.kind(), "No connected members for role");
                        continue;
                    }
                    for party in members {
                        if seen.insert(party.clone()) {
                            targets.push(party);
                        }
                    }
                }
            }
        }

        report.identities = targets.len();
        for party in &targets {
            let tally = self.registry.deliver(party, event).await;
            report.delivered += tally.sent;
            report.failed += tally.failed;

            if tally.sent == 0 && event.is_cacheable() {
                self.cache.enqueue(party, event.clone());
                report.cached += 1;
            }
        }

        tracing::debug!(
            event = event.kind(),
            session_id = ?event.session_id(),
            identities = report.identities,
            delivered = report.delivered,
            failed = report.failed,
            cached = report.cached,
            "Fan-out complete"
        );
        report
    }

    /// Register a new connection and replay anything buffered for it.
    ///
    /// The party's own buffer is flushed first, then its role's fallback bucket.
    pub async fn attach(&self, conn: Connection) -> Arc<Connection> {
        let conn = self.registry.register(conn).await;

        let mut pending = self.cache.flush(&conn.party);
        if let Some(bucket) = conn.role().fallback_bucket() {
            if bucket != conn.party {
                pending.extend(self.cache.flush(&bucket));
            }
        }

        if !pending.is_empty() {
            tracing::info!(
                connection_id = %conn.connection_id,
                party = %conn.party,
                count = pending.len(),
                "Replaying cached events"
            );
        }
        for event in pending {
            if conn.send(event).is_err() {
                tracing::warn!(
                    connection_id = %conn.connection_id,
                    "Connection closed during cache replay"
                );
                break;
            }
        }

        conn
    }

    pub async fn detach(&self, conn: &Connection) {
        self.registry
            .unregister(&conn.party, &conn.connection_id)
            .await;
    }

    /// Drop all connections and buffered events
    pub async fn clear(&self) {
        self.registry.clear().await;
        self.cache.clear();
    }
}
