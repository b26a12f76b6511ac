/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use serde::{Deserialize, Serialize};

/// Who may open conversations with / message a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhoCanMessage {
    Everyone,
    Contacts,
    Nobody,
}

impl WhoCanMessage {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "everyone" => Some(Self::Everyone),
            "contacts" => Some(Self::Contacts),
            "nobody" => Some(Self::Nobody),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Contacts => "contacts",
            Self::Nobody => "nobody",
        }
    }
}

/// Privacy settings stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub online_status: bool,
    pub read_receipts: bool,
    pub who_can_message: WhoCanMessage,
    pub typing: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            online_status: true,
            read_receipts: true,
            who_can_message: WhoCanMessage::Everyone,
            typing: true,
        }
    }
}

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub status_message: String,
    pub is_online: bool,
    pub last_seen: String,
    pub privacy: PrivacySettings,
    pub created_at: String,
    pub updated_at: String,
}

/// Presence columns as last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

/// Message record in the messages table
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversation record with its participant ids
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub participants: Vec<String>,
    pub last_message_id: Option<String>,
    pub last_message_at: String,
    pub created_at: String,
}
