//! User, presence and privacy queries.
//!
//! Every presence write goes through [`write_presence`] or [`write_offline`].
//! `write_presence` folds the privacy flag into the UPDATE itself, so an
//! `is_online = 1` row can never be produced for a user who hides their status.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use uuid::Uuid;

use super::models::{PresenceRecord, PrivacySettings, User, WhoCanMessage};
use super::{now_timestamp, StoreError, StoreResult};

const USER_COLUMNS: &str = "id, email, name, image, status_message, is_online, last_seen,
    privacy_online_status, privacy_read_receipts, privacy_who_can_message, privacy_typing,
    created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let who: String = row.get(9)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        image: row.get(3)?,
        status_message: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: row.get(6)?,
        privacy: PrivacySettings {
            online_status: row.get(7)?,
            read_receipts: row.get(8)?,
            who_can_message: WhoCanMessage::from_str(&who).unwrap_or(WhoCanMessage::Everyone),
            typing: row.get(10)?,
        },
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Insert a new user with default privacy settings.
pub fn insert_user(
    conn: &Connection,
    email: &str,
    name: &str,
    image: Option<&str>,
) -> StoreResult<User> {
    let id = Uuid::now_v7().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO users (id, email, name, image, last_seen, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
        params![id, email.to_lowercase(), name, image, now],
    )?;
    find_user(conn, &id)?.ok_or(StoreError::NotFound("user"))
}

pub fn find_user(conn: &Connection, user_id: &str) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![user_id], user_from_row)
        .optional()?)
}

/// Users other than `exclude_id` whose name or email contains `query`
/// (case-insensitive), ordered by name. An empty query matches everyone.
pub fn search_users(
    conn: &Connection,
    exclude_id: &str,
    query: &str,
    limit: usize,
) -> StoreResult<Vec<User>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE id != ?1
           AND (?2 = '' OR instr(lower(name), lower(?2)) > 0 OR instr(email, lower(?2)) > 0)
         ORDER BY name COLLATE NOCASE, id
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params![exclude_id, query.trim(), limit as i64], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Translate an identity supplied by a client (user id or email) to the
/// durable user id used as the personal room key.
pub fn resolve_identity(conn: &Connection, identity: &str) -> StoreResult<Option<String>> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Ok(None);
    }
    let id = conn
        .query_row(
            "SELECT id FROM users WHERE id = ?1 OR email = lower(?1)",
            params![identity],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(id)
}

/// Read the privacy settings for a user.
pub fn privacy_of(conn: &Connection, user_id: &str) -> StoreResult<PrivacySettings> {
    find_user(conn, user_id)?
        .map(|u| u.privacy)
        .ok_or(StoreError::NotFound("user"))
}

pub fn presence_of(conn: &Connection, user_id: &str) -> StoreResult<PresenceRecord> {
    conn.query_row(
        "SELECT is_online, last_seen FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(PresenceRecord {
                is_online: row.get(0)?,
                last_seen: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or(StoreError::NotFound("user"))
}

/// Privacy-gated presence write used by authenticate and heartbeat.
///
/// Writes `is_online = requested AND privacy_online_status` and
/// `last_seen = now`, returning what was actually stored.
pub fn write_presence(
    conn: &Connection,
    user_id: &str,
    requested_online: bool,
    now: &str,
) -> StoreResult<PresenceRecord> {
    let changed = conn.execute(
        "UPDATE users
         SET is_online = (?2 AND privacy_online_status), last_seen = ?3
         WHERE id = ?1",
        params![user_id, requested_online, now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound("user"));
    }
    presence_of(conn, user_id)
}

/// Unconditional offline write. Going offline never needs a privacy check.
pub fn write_offline(conn: &Connection, user_id: &str, now: &str) -> StoreResult<PresenceRecord> {
    let changed = conn.execute(
        "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
        params![user_id, now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound("user"));
    }
    Ok(PresenceRecord {
        is_online: false,
        last_seen: now.to_string(),
    })
}

/// Flip every online user whose `last_seen` is older than `cutoff` offline.
/// Returns the ids that were flipped; users already offline are untouched.
pub fn sweep_stale(conn: &Connection, cutoff: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "UPDATE users SET is_online = 0
         WHERE is_online = 1 AND last_seen < ?1
         RETURNING id",
    )?;
    let ids = stmt
        .query_map(params![cutoff], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Partial privacy update. Absent fields keep their stored value.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyUpdate {
    pub online_status: Option<bool>,
    pub read_receipts: Option<bool>,
    pub who_can_message: Option<WhoCanMessage>,
    pub typing: Option<bool>,
}

pub fn update_privacy(
    conn: &Connection,
    user_id: &str,
    update: &PrivacyUpdate,
) -> StoreResult<PrivacySettings> {
    let current = privacy_of(conn, user_id)?;
    let next = PrivacySettings {
        online_status: update.online_status.unwrap_or(current.online_status),
        read_receipts: update.read_receipts.unwrap_or(current.read_receipts),
        who_can_message: update.who_can_message.unwrap_or(current.who_can_message),
        typing: update.typing.unwrap_or(current.typing),
    };

    conn.execute(
        "UPDATE users
         SET privacy_online_status = ?2, privacy_read_receipts = ?3,
             privacy_who_can_message = ?4, privacy_typing = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            user_id,
            next.online_status,
            next.read_receipts,
            next.who_can_message.as_str(),
            next.typing,
            now_timestamp()
        ],
    )?;

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{format_timestamp, init_memory_db, lock};
    use chrono::{Duration, Utc};

    fn hide_status(conn: &Connection, user_id: &str) {
        let update = PrivacyUpdate {
            online_status: Some(false),
            ..Default::default()
        };
        update_privacy(conn, user_id, &update).unwrap();
    }

    #[test]
    fn resolve_identity_accepts_id_or_email() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let user = insert_user(&conn, "Alice@Example.com", "Alice", None).unwrap();

        assert_eq!(resolve_identity(&conn, &user.id).unwrap(), Some(user.id.clone()));
        assert_eq!(
            resolve_identity(&conn, "alice@example.com").unwrap(),
            Some(user.id.clone())
        );
        assert_eq!(
            resolve_identity(&conn, "ALICE@example.com").unwrap(),
            Some(user.id)
        );
        assert_eq!(resolve_identity(&conn, "nobody@example.com").unwrap(), None);
        assert_eq!(resolve_identity(&conn, "  ").unwrap(), None);
    }

    #[test]
    fn presence_write_honors_privacy_flag() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let user = insert_user(&conn, "hidden@example.com", "Hidden", None).unwrap();
        hide_status(&conn, &user.id);

        // No sequence of online requests may store is_online = 1
        for _ in 0..3 {
            let record = write_presence(&conn, &user.id, true, &now_timestamp()).unwrap();
            assert!(!record.is_online);
        }
        assert!(!presence_of(&conn, &user.id).unwrap().is_online);
    }

    #[test]
    fn presence_write_goes_online_when_allowed() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let user = insert_user(&conn, "visible@example.com", "Visible", None).unwrap();

        let now = now_timestamp();
        let record = write_presence(&conn, &user.id, true, &now).unwrap();
        assert!(record.is_online);
        assert_eq!(record.last_seen, now);

        let record = write_presence(&conn, &user.id, false, &now).unwrap();
        assert!(!record.is_online);
    }

    #[test]
    fn offline_write_ignores_privacy_flag() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let shown = insert_user(&conn, "shown@example.com", "Shown", None).unwrap();
        let hidden = insert_user(&conn, "hidden2@example.com", "Hidden", None).unwrap();
        hide_status(&conn, &hidden.id);

        write_presence(&conn, &shown.id, true, &now_timestamp()).unwrap();
        for id in [&shown.id, &hidden.id] {
            let record = write_offline(&conn, id, &now_timestamp()).unwrap();
            assert!(!record.is_online);
            assert!(!presence_of(&conn, id).unwrap().is_online);
        }
    }

    #[test]
    fn presence_write_for_unknown_user_is_not_found() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        assert!(matches!(
            write_presence(&conn, "missing", true, &now_timestamp()),
            Err(StoreError::NotFound("user"))
        ));
    }

    #[test]
    fn sweep_flips_only_stale_online_users_and_is_idempotent() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let stale = insert_user(&conn, "stale@example.com", "Stale", None).unwrap();
        let fresh = insert_user(&conn, "fresh@example.com", "Fresh", None).unwrap();

        let long_ago = format_timestamp(Utc::now() - Duration::minutes(10));
        write_presence(&conn, &stale.id, true, &long_ago).unwrap();
        write_presence(&conn, &fresh.id, true, &now_timestamp()).unwrap();

        let cutoff = format_timestamp(Utc::now() - Duration::minutes(2));
        assert_eq!(sweep_stale(&conn, &cutoff).unwrap(), vec![stale.id.clone()]);
        assert!(!presence_of(&conn, &stale.id).unwrap().is_online);
        assert!(presence_of(&conn, &fresh.id).unwrap().is_online);

        assert!(sweep_stale(&conn, &cutoff).unwrap().is_empty());
    }

    #[test]
    fn search_matches_name_or_email_and_skips_caller() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let me = insert_user(&conn, "me@example.com", "Me", None).unwrap();
        let alice = insert_user(&conn, "alice@example.com", "Alice Smith", None).unwrap();
        let bob = insert_user(&conn, "bob@other.org", "Bob", None).unwrap();

        let found = search_users(&conn, &me.id, "SMITH", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, alice.id);

        let found = search_users(&conn, &me.id, "other.org", 10).unwrap();
        assert_eq!(found[0].id, bob.id);

        let everyone: Vec<String> = search_users(&conn, &me.id, "", 10)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(everyone, vec![alice.id, bob.id]);
        assert_eq!(search_users(&conn, &me.id, "", 1).unwrap().len(), 1);
    }

    #[test]
    fn privacy_update_is_partial() {
        let db = init_memory_db().unwrap();
        let conn = lock(&db).unwrap();
        let user = insert_user(&conn, "p@example.com", "P", None).unwrap();

        let update = PrivacyUpdate {
            who_can_message: Some(WhoCanMessage::Contacts),
            ..Default::default()
        };
        let privacy = update_privacy(&conn, &user.id, &update).unwrap();
        assert_eq!(privacy.who_can_message, WhoCanMessage::Contacts);
        assert!(privacy.online_status);
        assert!(privacy.read_receipts);
        assert_eq!(privacy_of(&conn, &user.id).unwrap(), privacy);
    }
}
