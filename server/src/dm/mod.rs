//! REST endpoints for one-to-one conversations and their messages.

pub mod conversations;
pub mod messages;
pub mod read;

use axum::http::StatusCode;
use serde::Serialize;

use crate::db::models::{ConversationRow, MessageRow, MessageType, PrivacySettings};
use crate::db::{self, conversations as store, users};
use crate::state::AppState;

/// Load a conversation the caller takes part in.
/// 404 if it does not exist, 403 if the caller is not a participant.
pub(crate) async fn participant_conversation(
    state: &AppState,
    conversation_id: &str,
    user_id: &str,
) -> Result<ConversationRow, StatusCode> {
    let (id, uid) = (conversation_id.to_string(), user_id.to_string());
    let (conversation, member) = db::with_db(&state.db, move |conn| {
        let Some(conversation) = store::find_conversation(conn, &id)? else {
            return Ok(None);
        };
        let member = store::is_participant(conn, &id, &uid)?;
        Ok(Some((conversation, member)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    if !member {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(conversation)
}

/// The participant that is not `user_id`.
pub(crate) fn other_participant(conversation: &ConversationRow, user_id: &str) -> Option<String> {
    conversation
        .participants
        .iter()
        .find(|p| p.as_str() != user_id)
        .cloned()
}

/// Privacy of both sides of a conversation: (caller, other).
pub(crate) async fn privacy_pair(
    state: &AppState,
    user_id: &str,
    other_id: &str,
) -> Result<(PrivacySettings, PrivacySettings), StatusCode> {
    let (me, other) = (user_id.to_string(), other_id.to_string());
    let pair = db::with_db(&state.db, move |conn| {
        Ok((users::privacy_of(conn, &me)?, users::privacy_of(conn, &other)?))
    })
    .await?;
    Ok(pair)
}

/// Canonical message record as returned over REST and relayed by clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
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

impl From<MessageRow> for MessageResponse {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content: row.content,
            message_type: row.message_type,
            is_read: row.is_read,
            read_at: row.read_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl MessageResponse {
    /// Hide read state on the caller's own messages when receipts are off
    /// on either side.
    pub fn gated(mut self, viewer_id: &str, receipts_visible: bool) -> Self {
        if self.sender_id == viewer_id && !receipts_visible {
            self.is_read = false;
            self.read_at = None;
        }
        self
    }
}
