//! Per-key serialization for sessions and parties

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use chatrelay_shared::{PartyId, SessionId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle lock entries are pruned once the table grows past this
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per key, created on first use
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Serializes writers to one session
pub type SessionLocks = KeyedLocks<SessionId>;

/// Serializes find-or-create of a party's session
pub type PartyLocks = KeyedLocks<PartyId>;

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Released when the guard drops.
    pub async fn acquire(&self, id: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the table holds a reference: nobody waits on it
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
