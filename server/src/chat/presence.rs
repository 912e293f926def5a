//! Presence sockets and the friend-list broadcast.
//!
//! A presence socket carries no client payload of interest; it exists so the
//! server can push the user's friend list with online flags whenever someone
//! connects or disconnects. Status is persisted in `user_status` so the list
//! survives restarts and is also served over HTTP (`GET /chat/friends`).

use axum::extract::ws::WebSocket;
use rusqlite::Connection as DbConnection;

use crate::chat::protocol::text_frame;
use crate::chat::store::{self, StoreResult};
use crate::db::models::PresenceStatus;
use crate::state::AppState;
use crate::ws::actor::Connection;
use crate::ws::{ConnectionRegistry, Role};

/// Pushes presence state to connected presence sockets.
///
/// Sessions call this after every registry change; implementations decide
/// how much to recompute.
pub trait PresenceBroadcaster: Send + Sync {
    /// Returns the number of sockets that were sent a frame.
    fn broadcast(&self, registry: &ConnectionRegistry, conn: &DbConnection) -> StoreResult<usize>;
}

/// Recomputes every connected user's full friend list on each event.
///
/// Cost is registered users times friends per user, fine at friend-list
/// scale and not meant for global fan-out.
#[derive(Debug, Default, Clone, Copy)]
pub struct FriendListBroadcaster;

impl PresenceBroadcaster for FriendListBroadcaster {
    fn broadcast(&self, registry: &ConnectionRegistry, conn: &DbConnection) -> StoreResult<usize> {
        let mut pushed = 0;
        for (user_id, handle) in registry.snapshot(Role::Presence) {
            let friends = match store::friend_statuses(conn, &user_id) {
                Ok(friends) => friends,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Friend list query failed");
                    continue;
                }
            };
            let Some(frame) = text_frame(&friends) else {
                continue;
            };
            if handle.send(frame) {
                pushed += 1;
            } else {
                tracing::debug!(user_id = %user_id, "Presence socket already closed");
            }
        }
        Ok(pushed)
    }
}

/// Which edge of a socket's life triggered a presence update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Connected,
    Disconnected,
}

/// Persist the status implied by `change` and run a broadcast pass.
///
/// A disconnect marks the user offline only if no chat or presence socket of
/// theirs is registered. That check runs under the DB lock: a reconnecting
/// session registers before its own `Online` write, so a stale disconnect
/// either lands first or sees the new socket.
pub async fn publish_presence(state: &AppState, user_id: &str, change: PresenceChange) {
    let registry = state.registry.clone();
    let broadcaster = state.broadcaster.clone();
    let uid = user_id.to_string();

    let result = store::blocking(&state.db, move |conn| {
        let status = match change {
            PresenceChange::Connected => Some(PresenceStatus::Online),
            PresenceChange::Disconnected if registry.is_connected(&uid) => None,
            PresenceChange::Disconnected => Some(PresenceStatus::Offline),
        };
        if let Some(status) = status {
            if let Err(e) = store::persist_presence(conn, &uid, status) {
                tracing::warn!(user_id = %uid, status = status.as_str(), error = %e, "Failed to persist presence");
            }
        }
        broadcaster.broadcast(&registry, conn)
    })
    .await;

    match result {
        Ok(pushed) => tracing::debug!(user_id = %user_id, change = ?change, pushed, "Presence broadcast"),
        Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Presence broadcast failed"),
    }
}

/// Called after a chat or presence socket registers.
pub async fn user_connected(state: &AppState, user_id: &str) {
    publish_presence(state, user_id, PresenceChange::Connected).await;
}

/// Called after a chat or presence socket unregisters.
pub async fn user_disconnected(state: &AppState, user_id: &str) {
    publish_presence(state, user_id, PresenceChange::Disconnected).await;
}

/// Presence socket session: register, push, idle until the socket dies, clean up.
pub async fn run_presence_session(socket: WebSocket, state: AppState, user_id: String) {
    let mut conn = Connection::start(socket, &user_id, state.liveness);
    state
        .registry
        .register(Role::Presence, &user_id, conn.handle().clone());
    tracing::info!(user_id = %user_id, "Presence socket connected");

    user_connected(&state, &user_id).await;

    while let Some(text) = conn.next_text().await {
        tracing::debug!(
            user_id = %user_id,
            "Ignoring presence frame: {}",
            text.chars().take(100).collect::<String>()
        );
    }

    state
        .registry
        .unregister(Role::Presence, &user_id, conn.handle());
    conn.shutdown();

    user_disconnected(&state, &user_id).await;
    tracing::info!(user_id = %user_id, "Presence socket disconnected");
}
