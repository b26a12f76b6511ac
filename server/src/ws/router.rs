use axum::extract::ws::Message;

use super::protocol::ServerEvent;
use super::{ConnectionId, ConnectionRegistry, ConnectionSender, Room};

/// Encode a server event as a JSON text frame.
fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Queue one frame on every target. Closed channels are skipped silently.
fn deliver(targets: Vec<(ConnectionId, ConnectionSender)>, msg: Message) -> usize {
    targets
        .into_iter()
        .filter(|(_, sender)| sender.send(msg.clone()).is_ok())
        .count()
}

/// Deliver an event to every current member of `room`, skipping `exclude`.
/// Returns how many connections it was queued for.
pub fn broadcast(
    registry: &ConnectionRegistry,
    room: &Room,
    event: &ServerEvent,
    exclude: Option<ConnectionId>,
) -> usize {
    broadcast_to_rooms(registry, std::slice::from_ref(room), event, exclude)
}

/// Deliver an event to a user's personal room, whatever view they have open.
pub fn broadcast_to_identity(
    registry: &ConnectionRegistry,
    user_id: &str,
    event: &ServerEvent,
) -> usize {
    broadcast(registry, &Room::user(user_id), event, None)
}

/// Deliver an event to the union of several rooms' members.
/// A connection that is in more than one of them still gets it once.
pub fn broadcast_to_rooms(
    registry: &ConnectionRegistry,
    rooms: &[Room],
    event: &ServerEvent,
    exclude: Option<ConnectionId>,
) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };
    let targets = registry.snapshot_rooms(rooms, exclude);
    let delivered = deliver(targets, msg);

    tracing::debug!(
        event = event.name(),
        rooms = rooms.len(),
        delivered,
        "Broadcast"
    );
    delivered
}

/// Deliver an event to every live connection, skipping `exclude`.
pub fn broadcast_to_all(
    registry: &ConnectionRegistry,
    event: &ServerEvent,
    exclude: Option<ConnectionId>,
) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };
    deliver(registry.snapshot_all(exclude), msg)
}

/// Reply on a single connection.
pub fn send_to_connection(
    registry: &ConnectionRegistry,
    conn_id: ConnectionId,
    event: &ServerEvent,
) -> bool {
    let Some(sender) = registry.sender_of(conn_id) else {
        return false;
    };
    match encode(event) {
        Some(msg) => sender.send(msg).is_ok(),
        None => false,
    }
}
