//! Permission gate for the chat sessions.
//!
//! Results are never cached: every message re-runs the query so an unfollow
//! or a group removal takes effect on the very next frame.

use rusqlite::{params, Connection};

use crate::chat::store::StoreResult;
use crate::db::models::FOLLOW_ACCEPTED;

/// True when an accepted follow edge exists between `a` and `b` in either direction.
pub fn can_private_message(conn: &Connection, a: &str, b: &str) -> StoreResult<bool> {
    let allowed = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM followers
             WHERE ((follower_id = ?1 AND followed_id = ?2)
                 OR (follower_id = ?2 AND followed_id = ?1))
               AND status = ?3
         )",
        params![a, b, FOLLOW_ACCEPTED],
        |row| row.get(0),
    )?;
    Ok(allowed)
}

pub fn is_group_member(conn: &Connection, user_id: &str, group_id: &str) -> StoreResult<bool> {
    let member = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
        params![group_id, user_id],
        |row| row.get(0),
    )?;
    Ok(member)
}
