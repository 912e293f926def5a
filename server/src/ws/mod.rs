pub mod actor;
pub mod handler;
pub mod liveness;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Sender half of a connection's outbound queue. The connection's writer
/// task drains the receiver into the socket; pushes never wait on it.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Frames that may wait for one socket's writer. A peer that falls this far
/// behind loses new frames until it catches up.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Non-owning reference to one live socket.
///
/// Two handles are the same connection only if they carry the same id; a
/// reconnect of the same user yields a fresh id.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// A handle plus the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<Message>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame for this connection without waiting. Returns false when
    /// the frame was not queued: the writer has shut down, or its queue is full.
    pub fn send(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection = self.id, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// True once the writer task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Which per-user map a connection lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Private chat socket: receives forwarded messages and typing signals.
    Chat,
    /// Presence socket: receives friend-list status pushes.
    Presence,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Presence => "presence",
        }
    }
}

/// In-memory map of live connections, owned by the composition root and
/// shared by reference.
///
/// Chat and presence sockets are keyed by user id with at most one entry per
/// user (last writer wins). Group sockets are keyed by group id, then user id.
/// Every map is sharded behind reader/writer locks; callers get cloned handles
/// back so no lock is ever held while a frame is written.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    chat: DashMap<String, ConnectionHandle>,
    presence: DashMap<String, ConnectionHandle>,
    groups: DashMap<String, HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, role: Role) -> &DashMap<String, ConnectionHandle> {
        match role {
            Role::Chat => &self.chat,
            Role::Presence => &self.presence,
        }
    }

    /// Store `handle` under (role, key), returning the handle it replaced.
    /// The replaced connection is left open; its own session closes it when
    /// its next read or write fails.
    pub fn register(
        &self,
        role: Role,
        key: &str,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let previous = self.map(role).insert(key.to_string(), handle);
        if let Some(prev) = &previous {
            tracing::debug!(
                role = role.as_str(),
                key = %key,
                replaced = prev.id(),
                "Connection superseded"
            );
        }
        previous
    }

    /// Remove (role, key) only while it still points at `handle`.
    /// A late unregister from a superseded session is a no-op.
    pub fn unregister(&self, role: Role, key: &str, handle: &ConnectionHandle) -> bool {
        self.map(role)
            .remove_if(key, |_, current| current == handle)
            .is_some()
    }

    pub fn lookup(&self, role: Role, key: &str) -> Option<ConnectionHandle> {
        self.map(role).get(key).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every entry for `role`, safe to iterate while
    /// writing to the sockets.
    pub fn snapshot(&self, role: Role) -> Vec<(String, ConnectionHandle)> {
        self.map(role)
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Ids of users holding a chat connection, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.chat.iter().map(|entry| entry.key().clone()).collect();
        users.sort();
        users
    }

    /// Whether the user still holds a chat or presence connection.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.chat.contains_key(user_id) || self.presence.contains_key(user_id)
    }

    /// Join `user_id`'s socket to a group, replacing that user's previous
    /// socket for the same group.
    pub fn join_group(
        &self,
        group_id: &str,
        user_id: &str,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string(), handle)
    }

    /// Remove the user's group socket if it is still `handle`. Empty groups
    /// are dropped from the map.
    pub fn leave_group(&self, group_id: &str, user_id: &str, handle: &ConnectionHandle) -> bool {
        let removed = match self.groups.get_mut(group_id) {
            Some(mut members) => {
                if members.get(user_id) == Some(handle) {
                    members.remove(user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        self.groups.remove_if(group_id, |_, members| members.is_empty());
        removed
    }

    pub fn group_snapshot(&self, group_id: &str) -> Vec<(String, ConnectionHandle)> {
        self.groups
            .get(group_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(user, handle)| (user.clone(), handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub type SharedRegistry = Arc<ConnectionRegistry>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> SharedRegistry {
    Arc::new(ConnectionRegistry::new())
}
