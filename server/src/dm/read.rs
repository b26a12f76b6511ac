//! REST endpoints for read state.
//!
//! The read flag is always stored. Whether the sender ever sees it is the
//! two-sided read-receipt gate's decision, evaluated at exposure time.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::auth::middleware::Claims;
use crate::chat::receipts;
use crate::db::{self, messages};
use crate::dm::{other_participant, participant_conversation, privacy_pair};
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::router;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conversation_id: String,
    /// Specific messages; all unread messages from the other side when absent
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub success: bool,
    pub modified_count: usize,
    pub show_read_receipt: bool,
}

/// PUT /api/messages/read — Mark messages sent to the caller as read.
/// JWT auth required. When both sides allow receipts, the sender's live
/// connections are told.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let conversation = participant_conversation(&state, &body.conversation_id, &claims.sub).await?;
    let other = other_participant(&conversation, &claims.sub);

    let reader_id = claims.sub.clone();
    let conversation_id = conversation.id.clone();
    let message_ids = body.message_ids;
    let modified_count = db::with_db(&state.db, move |conn| {
        messages::mark_read(conn, &conversation_id, &reader_id, message_ids.as_deref())
    })
    .await?;

    let show_read_receipt = match other.as_deref() {
        Some(other_id) => {
            let (reader, sender) = privacy_pair(&state, &claims.sub, other_id).await?;
            receipts::read_receipts_visible(&sender, &reader)
        }
        None => false,
    };

    if show_read_receipt && modified_count > 0 {
        if let Some(sender_id) = other.as_deref() {
            let event = ServerEvent::MessagesRead {
                conversation_id: conversation.id.clone(),
                read_by: claims.sub.clone(),
            };
            router::broadcast_to_identity(&state.connections, sender_id, &event);
        }
    }

    Ok(Json(MarkReadResponse {
        success: true,
        modified_count,
        show_read_receipt,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusQuery {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    pub message_id: String,
    pub is_read: bool,
    pub read_at: Option<String>,
}

/// GET /api/messages/read?conversationId= — Read state of the caller's own
/// messages, as far as the read-receipt gate lets them see it.
pub async fn read_status(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ReadStatusQuery>,
) -> Result<Json<Vec<ReadStatus>>, StatusCode> {
    let conversation = participant_conversation(&state, &query.conversation_id, &claims.sub).await?;
    let Some(other) = other_participant(&conversation, &claims.sub) else {
        return Ok(Json(Vec::new()));
    };
    let (sender, reader) = privacy_pair(&state, &claims.sub, &other).await?;

    let sender_id = claims.sub.clone();
    let sent = db::with_db(&state.db, move |conn| {
        messages::sent_messages(conn, &conversation.id, &sender_id)
    })
    .await?;

    let visible = receipts::read_receipts_visible(&sender, &reader);
    Ok(Json(
        sent.into_iter()
            .map(|message| {
                let read_at = receipts::visible_read_at(&message, &sender, &reader);
                ReadStatus {
                    is_read: visible && message.is_read,
                    read_at,
                    message_id: message.id,
                }
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounts {
    pub unread_counts: BTreeMap<String, usize>,
}

/// GET /api/messages/unread — Unread messages addressed to the caller,
/// keyed by conversation id. Every conversation is listed, zeros included.
pub async fn unread_counts(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCounts>, StatusCode> {
    let user_id = claims.sub.clone();
    let counts = db::with_db(&state.db, move |conn| messages::unread_counts(conn, &user_id)).await?;

    Ok(Json(UnreadCounts {
        unread_counts: counts.into_iter().collect(),
    }))
}
