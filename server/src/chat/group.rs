//! Group chat session: one per `/groups/chat?group_id=` socket.
//!
//! Membership is checked by the upgrade handler before the session starts
//! and again on every message, so a member removed mid-session stops being
//! able to post on the next frame.

use axum::extract::ws::WebSocket;

use crate::chat::permissions::is_group_member;
use crate::chat::protocol::{
    error_frame, text_frame, validate_body, InboundFrame, OutboundGroupMessage, TypingSignal,
    REJECT_NOT_MEMBER,
};
use crate::chat::store::{self, now_rfc3339};
use crate::db::models::GroupChatMessage;
use crate::state::AppState;
use crate::ws::actor::Connection;
use crate::ws::ConnectionHandle;

/// What happened to one inbound group frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFrameOutcome {
    Ignored,
    /// Typing signal pushed to this many other members.
    Typing(usize),
    Rejected(&'static str),
    /// Broadcast reached this many sockets, the sender's included.
    Broadcast(usize),
}

pub async fn run_group_session(
    socket: WebSocket,
    state: AppState,
    user_id: String,
    group_id: String,
) {
    let mut conn = Connection::start(socket, &user_id, state.liveness);
    state
        .registry
        .join_group(&group_id, &user_id, conn.handle().clone());
    tracing::info!(user_id = %user_id, group_id = %group_id, "Group chat socket connected");

    while let Some(text) = conn.next_text().await {
        let outcome = handle_group_frame(&state, &user_id, &group_id, conn.handle(), &text).await;
        tracing::debug!(
            user_id = %user_id,
            group_id = %group_id,
            outcome = ?outcome,
            "Group frame handled"
        );
    }

    state
        .registry
        .leave_group(&group_id, &user_id, conn.handle());
    conn.shutdown();
    tracing::info!(user_id = %user_id, group_id = %group_id, "Group chat socket disconnected");
}

/// Process one text frame from a member's group socket. The group id is the
/// one bound at connect time; any `group_id` in the payload is ignored.
pub async fn handle_group_frame(
    state: &AppState,
    sender_id: &str,
    group_id: &str,
    own: &ConnectionHandle,
    text: &str,
) -> GroupFrameOutcome {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(user_id = %sender_id, error = %e, "Undecodable group frame");
            return GroupFrameOutcome::Ignored;
        }
    };

    if frame.is_typing() {
        return GroupFrameOutcome::Typing(broadcast_typing(state, sender_id, group_id));
    }

    if let Err(reason) = validate_body(&frame.message) {
        return reject(own, reason);
    }

    let member = {
        let (user, group) = (sender_id.to_string(), group_id.to_string());
        store::blocking(&state.db, move |conn| is_group_member(conn, &user, &group)).await
    };
    match member {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(user_id = %sender_id, group_id = %group_id, "Sender no longer a group member");
            return reject(own, REJECT_NOT_MEMBER);
        }
        Err(e) => {
            tracing::error!(user_id = %sender_id, error = %e, "Membership check failed");
            return reject(own, REJECT_NOT_MEMBER);
        }
    }

    let msg = GroupChatMessage {
        id: uuid::Uuid::now_v7().to_string(),
        group_id: group_id.to_string(),
        sender_id: sender_id.to_string(),
        message: frame.message,
        created_at: now_rfc3339(),
    };

    let (persisted, sender_name) = {
        let row = msg.clone();
        store::blocking(&state.db, move |conn| {
            let persisted = store::persist_group_message(conn, &row);
            let name = store::sender_nickname(conn, &row.sender_id).ok().flatten();
            Ok((persisted, name))
        })
        .await
        .unwrap_or_else(|e| (Err(e), None))
    };
    if let Err(e) = persisted {
        tracing::error!(
            user_id = %sender_id,
            group_id = %group_id,
            error = %e,
            "Failed to persist group message"
        );
    }

    let outbound =
        OutboundGroupMessage::new(&msg, sender_name.unwrap_or_else(|| msg.sender_id.clone()));
    let Some(frame) = text_frame(&outbound) else {
        return GroupFrameOutcome::Broadcast(0);
    };

    // Each member is written independently; a dead socket only loses its own copy.
    let mut delivered = 0;
    for (member_id, handle) in state.registry.group_snapshot(group_id) {
        if handle.send(frame.clone()) {
            delivered += 1;
        } else {
            tracing::debug!(user_id = %member_id, group_id = %group_id, "Group member socket closed");
        }
    }
    GroupFrameOutcome::Broadcast(delivered)
}

fn broadcast_typing(state: &AppState, sender_id: &str, group_id: &str) -> usize {
    let Some(frame) = text_frame(&TypingSignal::from_sender(sender_id)) else {
        return 0;
    };
    state
        .registry
        .group_snapshot(group_id)
        .into_iter()
        .filter(|(member_id, _)| member_id != sender_id)
        .filter(|(_, handle)| handle.send(frame.clone()))
        .count()
}

fn reject(own: &ConnectionHandle, reason: &'static str) -> GroupFrameOutcome {
    if let Some(frame) = error_frame(reason) {
        own.send(frame);
    }
    GroupFrameOutcome::Rejected(reason)
}
