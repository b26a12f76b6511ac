//! Connection registry: live sockets, their bound identity and room memberships.
//!
//! Two indices are kept in step (connection -> rooms, room -> connections) under
//! a single lock, so a join, leave, disconnect or broadcast snapshot is never
//! observed half-applied.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use super::ConnectionSender;

/// Opaque per-socket handle. Allocated monotonically, never reused.
pub type ConnectionId = u64;

/// A broadcast group. Personal rooms are keyed by durable user id,
/// conversation rooms by conversation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Conversation(String),
}

impl Room {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User(user_id.into())
    }

    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        Self::Conversation(conversation_id.into())
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

/// What a closed connection left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub conn_id: ConnectionId,
    /// Identity that was bound, if the connection ever authenticated
    pub identity: Option<String>,
    /// Other live connections still bound to the same identity
    pub remaining: usize,
}

#[derive(Debug)]
struct Connection {
    sender: ConnectionSender,
    identity: Option<String>,
    rooms: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl Inner {
    fn remove_member(&mut self, room: &str, conn_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Connection registry shared by every socket task.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Bookkeeping stays consistent even if a holder panicked mid-broadcast
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new socket: fresh handle, no identity, no rooms.
    pub fn connect(&self, sender: ConnectionSender) -> ConnectionId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let conn_id = inner.next_id;
        inner.connections.insert(
            conn_id,
            Connection {
                sender,
                identity: None,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(conn_id, "connection registered");
        conn_id
    }

    /// Bind (or re-bind) an identity to a connection.
    /// Returns the identity previously bound. Unknown handles are ignored.
    pub fn bind_identity(&self, conn_id: ConnectionId, identity: &str) -> Option<String> {
        let mut inner = self.lock();
        let conn = inner.connections.get_mut(&conn_id)?;
        conn.identity.replace(identity.to_string())
    }

    pub fn identity_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.lock()
            .connections
            .get(&conn_id)
            .and_then(|c| c.identity.clone())
    }

    /// Add a connection to a room. Returns false if it was already a member
    /// or the handle is unknown.
    pub fn join(&self, conn_id: ConnectionId, room: &Room) -> bool {
        let key = room.key();
        let mut inner = self.lock();
        let Some(conn) = inner.connections.get_mut(&conn_id) else {
            return false;
        };
        if !conn.rooms.insert(key.clone()) {
            return false;
        }
        inner.rooms.entry(key).or_default().insert(conn_id);
        true
    }

    /// Remove a connection from a room. Returns false if it was not a member.
    pub fn leave(&self, conn_id: ConnectionId, room: &Room) -> bool {
        let key = room.key();
        let mut inner = self.lock();
        let removed = inner
            .connections
            .get_mut(&conn_id)
            .map(|conn| conn.rooms.remove(&key))
            .unwrap_or(false);
        if removed {
            inner.remove_member(&key, conn_id);
        }
        removed
    }

    /// Drop a connection from every room and clear its binding.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Option<Departure> {
        let mut inner = self.lock();
        let conn = inner.connections.remove(&conn_id)?;
        for room in &conn.rooms {
            inner.remove_member(room, conn_id);
        }

        let remaining = match &conn.identity {
            Some(identity) => inner
                .connections
                .values()
                .filter(|c| c.identity.as_deref() == Some(identity.as_str()))
                .count(),
            None => 0,
        };

        tracing::debug!(conn_id, rooms = conn.rooms.len(), "connection unregistered");

        Some(Departure {
            conn_id,
            identity: conn.identity,
            remaining,
        })
    }

    pub fn is_member(&self, conn_id: ConnectionId, room: &Room) -> bool {
        self.lock()
            .rooms
            .get(&room.key())
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<String> {
        let inner = self.lock();
        let mut rooms: Vec<String> = inner
            .connections
            .get(&conn_id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_size(&self, room: &Room) -> usize {
        self.lock()
            .rooms
            .get(&room.key())
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of live connections bound to an identity.
    pub fn connections_for_identity(&self, identity: &str) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|c| c.identity.as_deref() == Some(identity))
            .count()
    }

    /// Senders for the union of members of `rooms`, each connection once,
    /// skipping `exclude`. Taken under the lock; sending happens after.
    pub(crate) fn snapshot_rooms(
        &self,
        rooms: &[Room],
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, ConnectionSender)> {
        let inner = self.lock();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for room in rooms {
            let Some(members) = inner.rooms.get(&room.key()) else {
                continue;
            };
            for &conn_id in members {
                if Some(conn_id) == exclude || !seen.insert(conn_id) {
                    continue;
                }
                if let Some(conn) = inner.connections.get(&conn_id) {
                    out.push((conn_id, conn.sender.clone()));
                }
            }
        }
        out
    }

    pub(crate) fn snapshot_all(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, ConnectionSender)> {
        self.lock()
            .connections
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, conn)| (*id, conn.sender.clone()))
            .collect()
    }

    pub(crate) fn sender_of(&self, conn_id: ConnectionId) -> Option<ConnectionSender> {
        self.lock().connections.get(&conn_id).map(|c| c.sender.clone())
    }
}
