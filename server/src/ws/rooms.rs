//! Room router: chat id → connections currently viewing that chat.
//!
//! Rooms scope typing indicators to the open chat. Membership is not
//! persisted — it lives and dies with connections. The reverse index
//! (connection → joined chats) makes leave-all on disconnect O(rooms
//! joined) instead of a scan over every room.

use std::collections::HashSet;

use axum::extract::ws::Message;
use dashmap::DashMap;

use crate::ws::sessions::SessionRegistry;
use crate::ws::ConnectionId;

#[derive(Default)]
pub struct RoomRouter {
    rooms: DashMap<String, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a chat's room. A connection may sit in any
    /// number of rooms at once.
    pub fn join(&self, chat_id: &str, connection_id: ConnectionId) {
        self.rooms
            .entry(chat_id.to_string())
            .or_default()
            .insert(connection_id);
        self.joined
            .entry(connection_id)
            .or_default()
            .insert(chat_id.to_string());
    }

    /// Remove a connection from every room it joined. Called on
    /// disconnect.
    pub fn leave_all(&self, connection_id: ConnectionId) {
        let Some((_, chats)) = self.joined.remove(&connection_id) else {
            return;
        };
        for chat_id in chats {
            let mut emptied = false;
            if let Some(mut set) = self.rooms.get_mut(&chat_id) {
                set.remove(&connection_id);
                emptied = set.is_empty();
            }
            if emptied {
                self.rooms.remove_if(&chat_id, |_, set| set.is_empty());
            }
        }
    }

    /// Connections currently in a chat's room. Unknown chat → empty set.
    pub fn connections_in(&self, chat_id: &str) -> HashSet<ConnectionId> {
        self.rooms
            .get(chat_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Deliver a message to every connection in the room, except the
    /// optionally excluded one (whether the actor hears its own typing
    /// echo is an event-type policy, decided by the caller).
    pub fn broadcast_to_room(
        &self,
        chat_id: &str,
        msg: &Message,
        exclude: Option<ConnectionId>,
        sessions: &SessionRegistry,
    ) {
        for connection_id in self.connections_in(chat_id) {
            if Some(connection_id) == exclude {
                continue;
            }
            sessions.send_to_connection(connection_id, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn join_and_leave_all() {
        let rooms = RoomRouter::new();
        let c1 = Uuid::new_v4();

        rooms.join("chat-1", c1);
        rooms.join("chat-2", c1);
        assert!(rooms.connections_in("chat-1").contains(&c1));
        assert!(rooms.connections_in("chat-2").contains(&c1));

        rooms.leave_all(c1);
        assert!(rooms.connections_in("chat-1").is_empty());
        assert!(rooms.connections_in("chat-2").is_empty());

        // Leaving twice is harmless
        rooms.leave_all(c1);
    }

    #[test]
    fn broadcast_respects_exclusion_and_skips_left_connections() {
        let sessions = SessionRegistry::new();
        let rooms = RoomRouter::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        sessions.register("alice", c1, tx1);
        sessions.register("bob", c2, tx2);

        rooms.join("chat-1", c1);
        rooms.join("chat-1", c2);

        rooms.broadcast_to_room("chat-1", &Message::Text("typing".into()), Some(c1), &sessions);
        assert!(rx1.try_recv().is_err(), "excluded connection must not receive");
        assert!(rx2.try_recv().is_ok());

        // After leave_all, the departed connection never hears the room again
        rooms.leave_all(c2);
        rooms.broadcast_to_room("chat-1", &Message::Text("typing".into()), None, &sessions);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
