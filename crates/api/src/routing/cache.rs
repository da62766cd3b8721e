//! In-memory delivery cache with lazy expiry
//!
//! Buffers events for parties that had no live connection when the event was fanned out.
//! Entries are never swept: expired ones are dropped the next time their party is flushed.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chatrelay_shared::{PartyId, SessionId};

use crate::websocket::events::ServerEvent;

/// Default max age for a buffered event (10 minutes)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// One undelivered event
#[derive(Debug, Clone)]
struct CacheEntry {
    kind: &'static str,
    session_id: Option<SessionId>,
    event: ServerEvent,
    enqueued_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.enqueued_at) < max_age
    }
}

/// Thread-safe per-party event buffer
pub struct DeliveryCache {
    entries: RwLock<HashMap<PartyId, Vec<CacheEntry>>>,
    max_age: Duration,
}

impl Default for DeliveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryCache {
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Buffer an event for `party`
    pub fn enqueue(&self, party: &PartyId, event: ServerEvent) {
        self.enqueue_at(party, event, Instant::now());
    }

    pub(crate) fn enqueue_at(&self, party: &PartyId, event: ServerEvent, now: Instant) {
        let entry = CacheEntry {
            kind: event.kind(),
            session_id: event.session_id(),
            event,
            enqueued_at: now,
        };

        if let Ok(mut entries) = self.entries.write() {
            let queue = entries.entry(party.clone()).or_default();
            queue.push(entry);
            tracing::debug!(
                party = %party,
                queued = queue.len(),
                "Event cached for offline party"
            );
        }
    }

    /// Take every buffered event for `party` in enqueue order, dropping expired ones.
    /// All entries for the party are removed whether or not they were still fresh.
    pub fn flush(&self, party: &PartyId) -> Vec<ServerEvent> {
        self.flush_at(party, Instant::now())
    }

    pub(crate) fn flush_at(&self, party: &PartyId, now: Instant) -> Vec<ServerEvent> {
        let Some(queue) = self
            .entries
            .write()
            .ok()
            .and_then(|mut entries| entries.remove(party))
        else {
            return Vec::new();
        };

        let total = queue.len();
        let fresh: Vec<ServerEvent> = queue
            .into_iter()
            .filter(|entry| {
                let fresh = entry.is_fresh(now, self.max_age);
                if !fresh {
                    tracing::debug!(
                        party = %party,
                        event = entry.kind,
                        session_id = ?entry.session_id,
                        "Dropping expired cached event"
                    );
                }
                fresh
            })
            .map(|entry| entry.event)
            .collect();

        tracing::debug!(
            party = %party,
            delivered = fresh.len(),
            expired = total - fresh.len(),
            "Flushed delivery cache"
        );
        fresh
    }

    /// Number of parties with buffered events
    pub fn pending_parties(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn pending_for(&self, party: &PartyId) -> usize {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.get(party).map(Vec::len))
            .unwrap_or(0)
    }

    /// Drop everything, used on shutdown
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
