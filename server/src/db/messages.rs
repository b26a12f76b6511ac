//! Message persistence and read-state queries.

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::conversations::touch_last_message;
use super::models::{MessageRow, MessageType};
use super::{now_timestamp, StoreResult};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, message_type, is_read, read_at, created_at, updated_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let kind: String = row.get(4)?;
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        message_type: MessageType::from_str(&kind).unwrap_or_default(),
        is_read: row.get(5)?,
        read_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Persist a message and bump the conversation's last-message pointer.
/// The id and timestamps assigned here are the canonical ones every
/// later push or poll refers to.
pub fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    message_type: MessageType,
) -> StoreResult<MessageRow> {
    let id = Uuid::now_v7().to_string();
    let now = now_timestamp();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, conversation_id, sender_id, content, message_type.as_str(), now],
    )?;
    touch_last_message(&tx, conversation_id, &id, &now)?;
    tx.commit()?;

    Ok(MessageRow {
        id,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        message_type,
        is_read: false,
        read_at: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

pub fn find_message(conn: &Connection, message_id: &str) -> StoreResult<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![message_id], message_from_row)
        .optional()?)
}

/// Unread messages addressed to `user_id`, per conversation they take part
/// in. Conversations with nothing unread are reported with zero.
pub fn unread_counts(conn: &Connection, user_id: &str) -> StoreResult<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT p.conversation_id, COUNT(m.id)
         FROM conversation_participants p
         LEFT JOIN messages m
           ON m.conversation_id = p.conversation_id AND m.sender_id != ?1 AND m.is_read = 0
         WHERE p.user_id = ?1
         GROUP BY p.conversation_id
         ORDER BY p.conversation_id",
    )?;
    let counts = stmt
        .query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// All messages of a conversation, oldest first.
pub fn list_messages(conn: &Connection, conversation_id: &str) -> StoreResult<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![conversation_id], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark unread messages sent to `reader_id` as read.
///
/// The read flag is always recorded; whether it is ever shown to the sender
/// is decided by the read-receipt gate, not here.
pub fn mark_read(
    conn: &Connection,
    conversation_id: &str,
    reader_id: &str,
    message_ids: Option<&[String]>,
) -> StoreResult<usize> {
    let now = now_timestamp();

    match message_ids {
        Some(ids) if !ids.is_empty() => {
            let mut modified = 0;
            for message_id in ids {
                modified += conn.execute(
                    "UPDATE messages SET is_read = 1, read_at = ?4
                     WHERE id = ?1 AND conversation_id = ?2 AND sender_id != ?3 AND is_read = 0",
                    params![message_id, conversation_id, reader_id, now],
                )?;
            }
            Ok(modified)
        }
        _ => Ok(conn.execute(
            "UPDATE messages SET is_read = 1, read_at = ?3
             WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![conversation_id, reader_id, now],
        )?),
    }
}

/// Read state of every message `sender_id` sent in a conversation.
pub fn sent_messages(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
) -> StoreResult<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1 AND sender_id = ?2 ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![conversation_id, sender_id], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
