//! Conversation deletion notices.

use crate::ws::protocol::ServerEvent;
use crate::ws::{router, ConnectionRegistry};

/// Tell every participant except the deleter that a conversation is gone.
///
/// Delivery goes through personal rooms, so it reaches participants whatever
/// view they have open. Participants with no live connection are skipped.
pub fn notify_deleted(
    registry: &ConnectionRegistry,
    conversation_id: &str,
    participants: &[String],
    deleted_by: &str,
) -> usize {
    let event = ServerEvent::ConversationDeleted {
        conversation_id: conversation_id.to_string(),
        deleted_by: deleted_by.to_string(),
    };

    let delivered: usize = participants
        .iter()
        .filter(|p| p.as_str() != deleted_by)
        .map(|p| router::broadcast_to_identity(registry, p, &event))
        .sum();

    tracing::info!(
        conversation_id = %conversation_id,
        deleted_by = %deleted_by,
        delivered,
        "Conversation deletion notified"
    );
    delivered
}
