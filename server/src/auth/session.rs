//! Session cookie to user identity lookup.
//!
//! Sessions are created by the login flow elsewhere in the backend; this
//! module only reads them.

use axum::http::{header, HeaderMap};
use rusqlite::{params, Connection, OptionalExtension};

use crate::chat::store::{self, now_rfc3339, StoreResult};
use crate::db::DbPool;

pub const SESSION_COOKIE_NAME: &str = "social-network-session";

/// Extract the session id from the request's Cookie headers.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The user owning an unexpired session, if any.
pub fn user_for_session(conn: &Connection, session_id: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT user_id FROM active_sessions WHERE session_id = ?1 AND expires_at > ?2",
            params![session_id, now_rfc3339()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Resolve the caller's user id from the session cookie.
/// `Ok(None)` means no cookie or an unknown/expired session.
pub async fn resolve_identity(db: &DbPool, headers: &HeaderMap) -> StoreResult<Option<String>> {
    let Some(session_id) = session_id_from_headers(headers) else {
        return Ok(None);
    };
    store::blocking(db, move |conn| user_for_session(conn, &session_id)).await
}
