//! Read-receipt visibility.

use crate::db::models::{MessageRow, PrivacySettings};

/// Read state is shown only when both sides have read receipts on.
pub fn read_receipts_visible(sender: &PrivacySettings, reader: &PrivacySettings) -> bool {
    sender.read_receipts && reader.read_receipts
}

/// Read timestamp of a message as the sender may see it.
pub fn visible_read_at(
    message: &MessageRow,
    sender: &PrivacySettings,
    reader: &PrivacySettings,
) -> Option<String> {
    if message.is_read && read_receipts_visible(sender, reader) {
        message.read_at.clone()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MessageType;

    fn privacy(read_receipts: bool) -> PrivacySettings {
        PrivacySettings {
            read_receipts,
            ..Default::default()
        }
    }

    #[test]
    fn gate_is_two_sided() {
        let message = MessageRow {
            id: "m1".into(),
            conversation_id: "42".into(),
            sender_id: "alice".into(),
            content: "hi".into(),
            message_type: MessageType::Text,
            is_read: true,
            read_at: Some("2026-01-01T00:00:00.000Z".into()),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
        };

        for (sender, reader) in [(true, true), (true, false), (false, true), (false, false)] {
            let visible = visible_read_at(&message, &privacy(sender), &privacy(reader));
            assert_eq!(visible.is_some(), sender && reader, "sender={sender} reader={reader}");
        }
    }

    #[test]
    fn unread_message_has_no_timestamp() {
        let message = MessageRow {
            id: "m1".into(),
            conversation_id: "42".into(),
            sender_id: "alice".into(),
            content: "hi".into(),
            message_type: MessageType::Text,
            is_read: false,
            read_at: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
        };
        assert_eq!(visible_read_at(&message, &privacy(true), &privacy(true)), None);
    }
}
