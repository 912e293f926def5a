//! Persistence calls consumed by the chat sessions and the history endpoints.
//!
//! Every function here is blocking and expects to be called from
//! `tokio::task::spawn_blocking` (see [`blocking`]).

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{
    ChatMessage, FriendStatus, GroupChatMessage, PresenceRecord, PresenceStatus, FOLLOW_ACCEPTED,
};
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("record not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run `f` against the locked connection on the blocking pool.
pub async fn blocking<T, F>(db: &DbPool, f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    })
    .await?
}

/// Current time as an RFC 3339 string, the format every timestamp column uses.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn persist_message(conn: &Connection, msg: &ChatMessage) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO private_chat_messages (id, sender_id, receiver_id, message, created_at, read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            msg.id,
            msg.sender_id,
            msg.receiver_id,
            msg.message,
            msg.created_at,
            msg.read
        ],
    )?;
    Ok(())
}

pub fn persist_group_message(conn: &Connection, msg: &GroupChatMessage) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO group_chat_messages (id, group_id, sender_id, message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![msg.id, msg.group_id, msg.sender_id, msg.message, msg.created_at],
    )?;
    Ok(())
}

/// Upsert the user's presence row, stamping `last_seen` with the current time.
pub fn persist_presence(
    conn: &Connection,
    user_id: &str,
    status: PresenceStatus,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO user_status (user_id, status, last_seen) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET status = excluded.status, last_seen = excluded.last_seen",
        params![user_id, status.as_str(), now_rfc3339()],
    )?;
    Ok(())
}

/// Missing rows mean the user never connected, reported as `None`.
pub fn load_presence(conn: &Connection, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
    let row = conn
        .query_row(
            "SELECT user_id, status, last_seen FROM user_status WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(user_id, status, last_seen)| PresenceRecord {
        user_id,
        status: PresenceStatus::parse(&status).unwrap_or(PresenceStatus::Offline),
        last_seen,
    }))
}

/// Flip `read` from false to true.
///
/// Returns `Ok(false)` when this call performed the transition and `Ok(true)`
/// when the message had already been read. The guarded UPDATE makes the
/// transition happen at most once even when two callers race.
pub fn mark_message_read(conn: &Connection, message_id: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE private_chat_messages SET read = 1 WHERE id = ?1 AND read = 0",
        params![message_id],
    )?;
    if changed == 1 {
        return Ok(false);
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM private_chat_messages WHERE id = ?1)",
        params![message_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(true)
    } else {
        Err(StoreError::NotFound)
    }
}

pub fn load_message(conn: &Connection, message_id: &str) -> StoreResult<Option<ChatMessage>> {
    Ok(conn
        .query_row(
            "SELECT id, sender_id, receiver_id, message, created_at, read
             FROM private_chat_messages WHERE id = ?1",
            params![message_id],
            chat_message_from_row,
        )
        .optional()?)
}

/// All private messages exchanged between `user_a` and `user_b`, oldest first.
pub fn fetch_history(conn: &Connection, user_a: &str, user_b: &str) -> StoreResult<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, message, created_at, read
         FROM private_chat_messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at ASC, id ASC",
    )?;
    let messages = stmt
        .query_map(params![user_a, user_b], chat_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn fetch_group_history(conn: &Connection, group_id: &str) -> StoreResult<Vec<GroupChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, group_id, sender_id, message, created_at
         FROM group_chat_messages
         WHERE group_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;
    let messages = stmt
        .query_map(params![group_id], |row| {
            Ok(GroupChatMessage {
                id: row.get(0)?,
                group_id: row.get(1)?,
                sender_id: row.get(2)?,
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn sender_nickname(conn: &Connection, user_id: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT nickname FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// The user's friend list joined against persisted presence.
/// Users without a `user_status` row are reported offline.
pub fn friend_statuses(conn: &Connection, user_id: &str) -> StoreResult<Vec<FriendStatus>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.nickname, u.avatar,
                CASE WHEN us.status = 'online' THEN 1 ELSE 0 END AS online
         FROM users u
         LEFT JOIN user_status us ON u.id = us.user_id
         WHERE u.id IN (
             SELECT followed_id FROM followers WHERE follower_id = ?1 AND status = ?2
             UNION
             SELECT follower_id FROM followers WHERE followed_id = ?1 AND status = ?2
         )
         ORDER BY u.nickname ASC",
    )?;
    let friends = stmt
        .query_map(params![user_id, FOLLOW_ACCEPTED], |row| {
            Ok(FriendStatus {
                id: row.get(0)?,
                nickname: row.get(1)?,
                avatar: row.get(2)?,
                online: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(friends)
}

fn chat_message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        message: row.get(3)?,
        created_at: row.get(4)?,
        read: row.get(5)?,
    })
}
