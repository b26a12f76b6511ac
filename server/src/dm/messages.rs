//! REST endpoint for persisting messages.
//!
//! Persistence always happens here, before any real-time push: the record
//! returned is the one clients relay with `sendMessage`, so a later poll can
//! always find what was pushed.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::{MessageType, WhoCanMessage};
use crate::db::{self, messages, users};
use crate::dm::{other_participant, participant_conversation, MessageResponse};
use crate::state::AppState;

/// Upper bound on message body size in bytes.
const MAX_CONTENT_LEN: usize = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

/// POST /api/messages — Persist a message. JWT auth required.
/// Body: { "conversationId", "content", "messageType"? }.
/// 403 if the caller is not a participant or the recipient accepts no messages.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), StatusCode> {
    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation = participant_conversation(&state, &body.conversation_id, &claims.sub).await?;
    let recipient_id = other_participant(&conversation, &claims.sub).ok_or(StatusCode::NOT_FOUND)?;

    let sender_id = claims.sub.clone();
    let conversation_id = conversation.id;
    let message_type = body.message_type;
    let row = db::with_db(&state.db, move |conn| {
        // Sharing this conversation already makes them contacts
        if users::privacy_of(conn, &recipient_id)?.who_can_message == WhoCanMessage::Nobody {
            return Ok(None);
        }
        messages::insert_message(conn, &conversation_id, &sender_id, &content, message_type)
            .map(Some)
    })
    .await?
    .ok_or(StatusCode::FORBIDDEN)?;

    tracing::debug!(
        message_id = %row.id,
        conversation_id = %row.conversation_id,
        "Message stored"
    );

    Ok((StatusCode::CREATED, Json(row.into())))
}
