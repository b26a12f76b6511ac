pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod router;

use std::sync::Arc;
use tokio::sync::mpsc;

pub use registry::{ConnectionId, ConnectionRegistry, Departure, Room};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Shared handle to the connection registry.
pub type SharedRegistry = Arc<ConnectionRegistry>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> SharedRegistry {
    Arc::new(ConnectionRegistry::new())
}
