//! Rebroadcast of already-persisted messages.

use crate::ws::protocol::{MessageSnapshot, ServerEvent};
use crate::ws::{router, ConnectionId, ConnectionRegistry, Room};

/// Push a persisted message to the conversation room and to the recipient's
/// personal room. Each connection gets it once; the origin never does.
/// Returns how many connections it was queued for.
pub fn publish(
    registry: &ConnectionRegistry,
    snapshot: &MessageSnapshot,
    recipient_id: Option<&str>,
    origin: Option<ConnectionId>,
) -> usize {
    let mut rooms = vec![Room::conversation(&snapshot.conversation_id)];
    if let Some(recipient_id) = recipient_id {
        rooms.push(Room::user(recipient_id));
    }

    let event = ServerEvent::ReceiveMessage(snapshot.clone());
    let delivered = router::broadcast_to_rooms(registry, &rooms, &event, origin);

    tracing::debug!(
        message_id = %snapshot.id,
        conversation_id = %snapshot.conversation_id,
        delivered,
        "Message fanned out"
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use serde_json::Map;
    use tokio::sync::mpsc;

    fn snapshot() -> MessageSnapshot {
        let mut fields = Map::new();
        fields.insert("content".into(), "hello".into());
        MessageSnapshot {
            id: "m1".into(),
            conversation_id: "42".into(),
            fields,
        }
    }

    fn connect(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.connect(tx), rx)
    }

    fn count(rx: &mut mpsc::UnboundedReceiver<Message>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn reaches_conversation_and_recipient_rooms_once() {
        let registry = ConnectionRegistry::new();
        let (sender, mut sender_rx) = connect(&registry);
        let (in_both, mut in_both_rx) = connect(&registry);
        let (personal_only, mut personal_rx) = connect(&registry);
        let (_elsewhere, mut elsewhere_rx) = connect(&registry);

        registry.join(sender, &Room::conversation("42"));
        registry.join(in_both, &Room::conversation("42"));
        registry.join(in_both, &Room::user("bob"));
        registry.join(personal_only, &Room::user("bob"));

        assert_eq!(publish(&registry, &snapshot(), Some("bob"), Some(sender)), 2);
        assert_eq!(count(&mut sender_rx), 0);
        assert_eq!(count(&mut in_both_rx), 1);
        assert_eq!(count(&mut personal_rx), 1);
        assert_eq!(count(&mut elsewhere_rx), 0);
    }

    #[test]
    fn payload_is_the_snapshot() {
        let registry = ConnectionRegistry::new();
        let (peer, mut rx) = connect(&registry);
        registry.join(peer, &Room::conversation("42"));

        publish(&registry, &snapshot(), None, None);
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["event"], "receive_message");
        assert_eq!(value["data"]["id"], "m1");
        assert_eq!(value["data"]["conversationId"], "42");
        assert_eq!(value["data"]["content"], "hello");
    }
}
