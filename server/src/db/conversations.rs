//! Conversation queries. Conversations are one-to-one; participants live in
//! the conversation_participants join table.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::ConversationRow;
use super::{now_timestamp, StoreError, StoreResult};

pub fn participants(conn: &Connection, conversation_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 ORDER BY user_id",
    )?;
    let ids = stmt
        .query_map(params![conversation_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn find_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> StoreResult<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, last_message_id, last_message_at, created_at
             FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    participants: Vec::new(),
                    last_message_id: row.get(1)?,
                    last_message_at: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;

    match row {
        Some(mut conversation) => {
            conversation.participants = participants(conn, conversation_id)?;
            Ok(Some(conversation))
        }
        None => Ok(None),
    }
}

/// Conversations `user_id` takes part in, most recent activity first.
pub fn list_for_user(conn: &Connection, user_id: &str) -> StoreResult<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM conversations c
         JOIN conversation_participants p ON p.conversation_id = c.id
         WHERE p.user_id = ?1
         ORDER BY c.last_message_at DESC, c.id DESC",
    )?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(conversation) = find_conversation(conn, &id)? {
            rows.push(conversation);
        }
    }
    Ok(rows)
}

pub fn is_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Id of the conversation between exactly these two users, if any.
/// Sharing a conversation is what makes two users contacts.
pub fn find_between(conn: &Connection, a: &str, b: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT p1.conversation_id
             FROM conversation_participants p1
             JOIN conversation_participants p2 ON p1.conversation_id = p2.conversation_id
             WHERE p1.user_id = ?1 AND p2.user_id = ?2
             LIMIT 1",
            params![a, b],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

pub fn create_conversation(conn: &Connection, a: &str, b: &str) -> StoreResult<ConversationRow> {
    let id = Uuid::now_v7().to_string();
    let now = now_timestamp();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO conversations (id, last_message_at, created_at) VALUES (?1, ?2, ?2)",
        params![id, now],
    )?;
    for user_id in [a, b] {
        tx.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
            params![id, user_id],
        )?;
    }
    tx.commit()?;

    find_conversation(conn, &id)?.ok_or(StoreError::NotFound("conversation"))
}

pub fn touch_last_message(
    conn: &Connection,
    conversation_id: &str,
    message_id: &str,
    at: &str,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE conversations SET last_message_id = ?2, last_message_at = ?3 WHERE id = ?1",
        params![conversation_id, message_id, at],
    )?;
    Ok(())
}

/// Delete a conversation and its messages. Returns the participants it had.
pub fn delete_conversation(conn: &Connection, conversation_id: &str) -> StoreResult<Vec<String>> {
    let members = participants(conn, conversation_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM messages WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    tx.execute(
        "DELETE FROM conversation_participants WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    let removed = tx.execute(
        "DELETE FROM conversations WHERE id = ?1",
        params![conversation_id],
    )?;
    tx.commit()?;

    if removed == 0 {
        return Err(StoreError::NotFound("conversation"));
    }
    Ok(members)
}
