use std::sync::Arc;

use crate::chat::presence::{FriendListBroadcaster, PresenceBroadcaster};
use crate::db::DbPool;
use crate::ws::liveness::LivenessConfig;
use crate::ws::{new_connection_registry, SharedRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live chat, presence and group sockets
    pub registry: SharedRegistry,
    /// Pushes friend-list status to presence sockets after every connect/disconnect
    pub broadcaster: Arc<dyn PresenceBroadcaster>,
    /// Read deadline and ping period applied to every socket
    pub liveness: LivenessConfig,
}

impl AppState {
    /// State with an empty registry and the friend-list broadcaster.
    pub fn new(db: DbPool, liveness: LivenessConfig) -> Self {
        Self {
            db,
            registry: new_connection_registry(),
            broadcaster: Arc::new(FriendListBroadcaster),
            liveness,
        }
    }
}
