//! Session registry: user identity → set of live connections.
//!
//! A user can be connected from several devices/tabs at once, so the
//! registry keeps a set of connection ids per user plus a reverse index
//! from connection id to its owning user and outbound sender. The
//! reverse index makes disconnect cleanup O(1) instead of a scan.

use std::collections::HashSet;

use axum::extract::ws::Message;
use dashmap::DashMap;

use crate::ws::{ConnectionId, ConnectionSender};

/// Per-connection record: the authenticated user and the writer channel.
pub struct ConnectionHandle {
    pub user_id: String,
    pub sender: ConnectionSender,
}

/// All live sessions, keyed both ways.
///
/// Invariant: a user id has an entry iff at least one of its
/// connections is live, and every connection id in a user's set has a
/// matching entry in `connections`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a user's session set.
    /// Returns true iff this was the user's first live connection
    /// (the 0→1 presence transition). Registering the same pair twice
    /// leaves the set unchanged and returns false.
    pub fn register(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        sender: ConnectionSender,
    ) -> bool {
        self.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id: user_id.to_string(),
                sender,
            },
        );

        let mut entry = self.sessions.entry(user_id.to_string()).or_default();
        let was_offline = entry.is_empty();
        entry.insert(connection_id);
        was_offline
    }

    /// Remove a connection. Returns the owning user id and whether this
    /// was the user's last live connection (the 1→0 presence
    /// transition), or None for an unknown connection id.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(String, bool)> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        let user_id = handle.user_id;

        let mut went_offline = false;
        if let Some(mut set) = self.sessions.get_mut(&user_id) {
            set.remove(&connection_id);
            went_offline = set.is_empty();
        }
        if went_offline {
            // The guard above is released; re-check emptiness so a
            // register that raced in between is not clobbered.
            self.sessions.remove_if(&user_id, |_, set| set.is_empty());
        }

        Some((user_id, went_offline))
    }

    /// Connection ids for a user. Unknown user → empty set, not an error.
    pub fn sessions_of(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.sessions
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions
            .get(user_id)
            .map(|entry| !entry.value().is_empty())
            .unwrap_or(false)
    }

    /// Push a message to one connection. A closed or unknown connection
    /// is a no-op — the disconnect path will reap it.
    pub fn send_to_connection(&self, connection_id: ConnectionId, msg: Message) {
        if let Some(handle) = self.connections.get(&connection_id) {
            let _ = handle.sender.send(msg);
        }
    }

    /// Push a message to every live connection of one user.
    pub fn send_to_user(&self, user_id: &str, msg: &Message) {
        for connection_id in self.sessions_of(user_id) {
            self.send_to_connection(connection_id, msg.clone());
        }
    }

    /// Push a message to every live connection of every user.
    pub fn broadcast_to_all(&self, msg: &Message) {
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(msg.clone());
        }
    }
}
