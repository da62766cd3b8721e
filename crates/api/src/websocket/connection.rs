//! WebSocket connection handle
//!
//! One live socket of a party. A party may hold several at once (tabs, devices).

use chatrelay_shared::{PartyId, Role};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this socket
    pub connection_id: Uuid,

    /// Identity supplied on the upgrade request
    pub party: PartyId,

    /// Channel to the socket's writer task
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    pub fn new(party: PartyId, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            party,
            sender,
        }
    }

    pub fn role(&self) -> Role {
        self.party.role()
    }

    /// Send an event to this connection
    ///
    /// Returns Err if the writer task has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(PartyId::from("admin-1"), tx);
        assert_eq!(conn.role(), Role::Admin);

        assert!(conn.send(ServerEvent::ping_now()).is_ok());
        assert!(matches!(rx.recv().await, Some(ServerEvent::Ping { .. })));
    }

    #[tokio::test]
    async fn test_send_fails_once_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(PartyId::from("user-1"), tx);
        drop(rx);

        assert!(conn.is_closed());
        assert!(conn.send(ServerEvent::ping_now()).is_err());
    }
}
