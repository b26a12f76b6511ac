use std::sync::Arc;
use std::time::Duration;

use crate::chat::presence::PresenceSettings;
use crate::chat::typing::{TypingCoordinator, DEFAULT_TYPING_TTL};
use crate::db::DbPool;
use crate::ws::{new_connection_registry, SharedRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live WebSocket connections and their room memberships
    pub connections: SharedRegistry,
    /// Ephemeral typing indicators
    pub typing: Arc<TypingCoordinator>,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Heartbeat and staleness windows
    pub presence: PresenceSettings,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, presence: PresenceSettings) -> Self {
        Self {
            db,
            connections: new_connection_registry(),
            typing: Arc::new(TypingCoordinator::new(DEFAULT_TYPING_TTL)),
            jwt_secret,
            presence,
        }
    }

    pub fn with_typing_ttl(mut self, ttl: Duration) -> Self {
        self.typing = Arc::new(TypingCoordinator::new(ttl));
        self
    }
}
