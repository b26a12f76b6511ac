//! REST endpoints for conversation management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::{lifecycle, receipts};
use crate::db::models::{ConversationRow, WhoCanMessage};
use crate::db::{self, conversations as store, messages, users, StoreError};
use crate::dm::{other_participant, participant_conversation, privacy_pair, MessageResponse};
use crate::state::AppState;
use crate::users::profile::UserSummary;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// User id or email of the other participant
    pub recipient_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: String,
    pub participants: Vec<String>,
    pub last_message_id: Option<String>,
    pub last_message_at: String,
    pub created_at: String,
}

impl From<ConversationRow> for ConversationResponse {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            participants: row.participants,
            last_message_id: row.last_message_id,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        }
    }
}

/// One entry of the caller's conversation list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessageResponse>,
    pub last_message_at: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationList {
    pub conversations: Vec<ConversationSummary>,
}

/// GET /api/conversations — The caller's conversations, most recent first.
/// JWT auth required. Reconnecting clients use it to rejoin their rooms.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ConversationList>, StatusCode> {
    let user_id = claims.sub.clone();
    let (mine, listed) = db::with_db(&state.db, move |conn| {
        let me = users::find_user(conn, &user_id)?.ok_or(StoreError::NotFound("user"))?;
        let mut listed = Vec::new();
        for conversation in store::list_for_user(conn, &user_id)? {
            let mut members = Vec::with_capacity(conversation.participants.len());
            for id in &conversation.participants {
                if let Some(user) = users::find_user(conn, id)? {
                    members.push(user);
                }
            }
            let last = match conversation.last_message_id.as_deref() {
                Some(id) => messages::find_message(conn, id)?,
                None => None,
            };
            listed.push((conversation, members, last));
        }
        Ok((me.privacy, listed))
    })
    .await?;

    let conversations = listed
        .into_iter()
        .map(|(conversation, members, last)| {
            let visible = members
                .iter()
                .find(|u| u.id != claims.sub)
                .is_some_and(|other| receipts::read_receipts_visible(&mine, &other.privacy));
            ConversationSummary {
                id: conversation.id,
                participants: members
                    .into_iter()
                    .map(|u| UserSummary::for_viewer(u, &claims.sub))
                    .collect(),
                last_message: last.map(|m| MessageResponse::from(m).gated(&claims.sub, visible)),
                last_message_at: conversation.last_message_at,
                created_at: conversation.created_at,
            }
        })
        .collect();

    Ok(Json(ConversationList { conversations }))
}

enum Outcome {
    Existing(ConversationRow),
    Created(ConversationRow),
}

/// POST /api/conversations — Create or get a one-to-one conversation.
/// JWT auth required. Body: { "recipientId": "<user id or email>" }.
///
/// The recipient's `whoCanMessage` decides whether a new conversation may be
/// opened: `nobody` refuses, `contacts` only allows an existing one.
pub async fn create_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), StatusCode> {
    let user_id = claims.sub.clone();
    let recipient = body.recipient_id;

    let outcome = db::with_db(&state.db, move |conn| {
        let Some(recipient_id) = users::resolve_identity(conn, &recipient)? else {
            return Ok(Err(StatusCode::NOT_FOUND));
        };
        if recipient_id == user_id {
            return Ok(Err(StatusCode::BAD_REQUEST));
        }

        let privacy = users::privacy_of(conn, &recipient_id)?;
        let existing = match store::find_between(conn, &user_id, &recipient_id)? {
            Some(id) => store::find_conversation(conn, &id)?,
            None => None,
        };

        match (privacy.who_can_message, existing) {
            (WhoCanMessage::Nobody, _) => Ok(Err(StatusCode::FORBIDDEN)),
            (_, Some(conversation)) => Ok(Ok(Outcome::Existing(conversation))),
            (WhoCanMessage::Contacts, None) => Ok(Err(StatusCode::FORBIDDEN)),
            (WhoCanMessage::Everyone, None) => Ok(Ok(Outcome::Created(
                store::create_conversation(conn, &user_id, &recipient_id)?,
            ))),
        }
    })
    .await??;

    match outcome {
        Outcome::Existing(conversation) => Ok((StatusCode::OK, Json(conversation.into()))),
        Outcome::Created(conversation) => {
            tracing::info!(
                conversation_id = %conversation.id,
                user_id = %claims.sub,
                "Conversation created"
            );
            Ok((StatusCode::CREATED, Json(conversation.into())))
        }
    }
}

/// DELETE /api/conversations/{id} — Delete a conversation and its messages,
/// then notify the other participant's live connections.
pub async fn delete_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    participant_conversation(&state, &conversation_id, &claims.sub).await?;

    let id = conversation_id.clone();
    let participants =
        db::with_db(&state.db, move |conn| store::delete_conversation(conn, &id)).await?;

    lifecycle::notify_deleted(
        &state.connections,
        &conversation_id,
        &participants,
        &claims.sub,
    );

    Ok(Json(serde_json::json!({ "success": true })))
}

/// GET /api/conversations/{id}/messages — Polling fallback. Oldest first.
/// Read state on the caller's own messages follows the read-receipt gate.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, StatusCode> {
    let conversation = participant_conversation(&state, &conversation_id, &claims.sub).await?;

    let visible = match other_participant(&conversation, &claims.sub) {
        Some(other) => {
            let (me, them) = privacy_pair(&state, &claims.sub, &other).await?;
            receipts::read_receipts_visible(&me, &them)
        }
        None => false,
    };

    let rows = db::with_db(&state.db, move |conn| {
        messages::list_messages(conn, &conversation_id)
    })
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| MessageResponse::from(row).gated(&claims.sub, visible))
            .collect(),
    ))
}
