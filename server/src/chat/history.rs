//! REST endpoints around the chat sockets: history, read receipts and
//! presence lookups. Session cookie auth on all of them.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::CurrentUser;
use crate::chat::permissions::is_group_member;
use crate::chat::store::{self, StoreError};
use crate::db::models::{ChatMessage, FriendStatus, GroupChatMessage};
use crate::state::AppState;

fn internal(e: StoreError) -> StatusCode {
    tracing::error!(error = %e, "Chat store error");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub with: Option<String>,
}

/// GET /chat/history?with=<user_id> -- Messages between the caller and `with`, oldest first.
pub async fn get_private_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let other = query
        .with
        .filter(|with| !with.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let messages = store::blocking(&state.db, move |conn| {
        store::fetch_history(conn, &user.user_id, &other)
    })
    .await
    .map_err(internal)?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct GroupHistoryQuery {
    pub group_id: Option<String>,
}

/// GET /groups/chat/messages?group_id=<id> -- Group messages, oldest first. Members only.
pub async fn get_group_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<GroupHistoryQuery>,
) -> Result<Json<Vec<GroupChatMessage>>, StatusCode> {
    let group_id = query
        .group_id
        .filter(|id| !id.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let messages = store::blocking(&state.db, move |conn| {
        if !is_group_member(conn, &user.user_id, &group_id)? {
            return Ok(None);
        }
        store::fetch_group_history(conn, &group_id).map(Some)
    })
    .await
    .map_err(internal)?
    .ok_or(StatusCode::FORBIDDEN)?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_id: String,
}

enum MarkReadOutcome {
    Marked,
    AlreadyRead,
    NotFound,
    NotReceiver,
}

/// PUT /markread -- Mark a received private message as read.
/// Body: { "message_id": "..." }
///
/// The transition happens once: repeating the call answers 409.
pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<MarkReadRequest>,
) -> Result<&'static str, StatusCode> {
    if body.message_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message_id = body.message_id;
    let outcome = store::blocking(&state.db, move |conn| {
        let Some(msg) = store::load_message(conn, &message_id)? else {
            return Ok(MarkReadOutcome::NotFound);
        };
        if msg.receiver_id != user.user_id {
            return Ok(MarkReadOutcome::NotReceiver);
        }
        match store::mark_message_read(conn, &message_id) {
            Ok(false) => Ok(MarkReadOutcome::Marked),
            Ok(true) => Ok(MarkReadOutcome::AlreadyRead),
            Err(StoreError::NotFound) => Ok(MarkReadOutcome::NotFound),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(internal)?;

    match outcome {
        MarkReadOutcome::Marked => Ok("Message marked as read"),
        MarkReadOutcome::AlreadyRead => Err(StatusCode::CONFLICT),
        MarkReadOutcome::NotFound => Err(StatusCode::NOT_FOUND),
        MarkReadOutcome::NotReceiver => Err(StatusCode::FORBIDDEN),
    }
}

/// GET /chat/online -- Users currently holding a chat socket on this node.
pub async fn get_online_users(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<Vec<String>> {
    Json(state.registry.online_users())
}

/// GET /chat/friends -- The caller's friend list with persisted online flags.
/// Same payload the presence socket pushes.
pub async fn get_friend_statuses(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<FriendStatus>>, StatusCode> {
    let friends = store::blocking(&state.db, move |conn| {
        store::friend_statuses(conn, &user.user_id)
    })
    .await
    .map_err(internal)?;

    Ok(Json(friends))
}
