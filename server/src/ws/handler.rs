use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::session::resolve_identity;
use crate::chat::permissions::is_group_member;
use crate::chat::protocol::{REJECT_MISSING_GROUP, REJECT_NOT_MEMBER, REJECT_UNAUTHORIZED};
use crate::chat::{group, presence, private, store};
use crate::state::AppState;
use crate::ws::actor;

/// Resolve the session cookie; lookup failures count as unauthenticated.
async fn identify(state: &AppState, headers: &HeaderMap) -> Option<String> {
    match resolve_identity(&state.db, headers).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error = %e, "Session lookup failed during upgrade");
            None
        }
    }
}

/// Upgrade, send `reason` as a text frame, then close. No registry entry is made.
fn rejected(ws: WebSocketUpgrade, reason: &'static str) -> Response {
    tracing::warn!(reason = reason, "WebSocket upgrade rejected");
    ws.on_upgrade(move |socket| actor::reject(socket, reason))
}

/// GET /chat/private
/// Private chat socket. Auth via the session cookie sent with the upgrade.
pub async fn private_chat_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match identify(&state, &headers).await {
        Some(user_id) => {
            ws.on_upgrade(move |socket| private::run_private_session(socket, state, user_id))
        }
        None => rejected(ws, REJECT_UNAUTHORIZED),
    }
}

/// GET /ws/online
/// Presence socket: receives the caller's friend list on every status change.
pub async fn presence_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match identify(&state, &headers).await {
        Some(user_id) => {
            ws.on_upgrade(move |socket| presence::run_presence_session(socket, state, user_id))
        }
        None => rejected(ws, REJECT_UNAUTHORIZED),
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupChatQuery {
    pub group_id: Option<String>,
}

/// GET /groups/chat?group_id=<id>
/// Group chat socket. Requires an identity and membership of the group.
pub async fn group_chat_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupChatQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = identify(&state, &headers).await else {
        return rejected(ws, REJECT_UNAUTHORIZED);
    };
    let Some(group_id) = query.group_id.filter(|id| !id.is_empty()) else {
        return rejected(ws, REJECT_MISSING_GROUP);
    };

    let member = {
        let (user, group) = (user_id.clone(), group_id.clone());
        store::blocking(&state.db, move |conn| is_group_member(conn, &user, &group)).await
    };
    match member {
        Ok(true) => ws.on_upgrade(move |socket| {
            group::run_group_session(socket, state, user_id, group_id)
        }),
        Ok(false) => rejected(ws, REJECT_NOT_MEMBER),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Membership check failed during upgrade");
            rejected(ws, REJECT_NOT_MEMBER)
        }
    }
}
