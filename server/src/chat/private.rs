//! Private chat session: one per `/chat/private` socket.
//!
//! Lifecycle: the upgrade handler resolves the identity (CONNECTING), the
//! session registers itself and loops over frames (ACTIVE), then unregisters
//! and marks the user offline when the socket dies (CLOSED).

use axum::extract::ws::WebSocket;

use crate::chat::permissions::can_private_message;
use crate::chat::presence;
use crate::chat::protocol::{
    error_frame, text_frame, validate_body, InboundFrame, OutboundMessage, TypingSignal,
    ERR_NOT_FOLLOWING,
};
use crate::chat::store::{self, now_rfc3339};
use crate::db::models::ChatMessage;
use crate::state::AppState;
use crate::ws::actor::Connection;
use crate::ws::{ConnectionHandle, Role};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Undecodable payload, dropped without telling the client.
    Ignored,
    TypingForwarded,
    /// Receiver has no chat socket.
    TypingDropped,
    /// An inline error frame was sent back.
    Rejected(&'static str),
    /// Persisted (or attempted) and pushed to the receiver's socket.
    Delivered,
    /// Persisted (or attempted); the receiver will see it in history.
    Stored,
}

pub async fn run_private_session(socket: WebSocket, state: AppState, user_id: String) {
    let mut conn = Connection::start(socket, &user_id, state.liveness);

    if let Some(previous) = state
        .registry
        .register(Role::Chat, &user_id, conn.handle().clone())
    {
        tracing::info!(
            user_id = %user_id,
            previous = previous.id(),
            "Chat socket replaced an existing connection"
        );
    }
    tracing::info!(user_id = %user_id, connection = conn.handle().id(), "Chat socket connected");

    presence::user_connected(&state, &user_id).await;

    while let Some(text) = conn.next_text().await {
        let outcome = handle_private_frame(&state, &user_id, conn.handle(), &text).await;
        tracing::debug!(user_id = %user_id, outcome = ?outcome, "Chat frame handled");
    }

    state.registry.unregister(Role::Chat, &user_id, conn.handle());
    conn.shutdown();

    presence::user_disconnected(&state, &user_id).await;
    tracing::info!(user_id = %user_id, "Chat socket disconnected");
}

/// Process one text frame from `sender_id`'s chat socket.
///
/// Identity, id and timestamp always come from the session, never from the
/// payload. Typing indicators skip the permission gate and are never stored.
pub async fn handle_private_frame(
    state: &AppState,
    sender_id: &str,
    own: &ConnectionHandle,
    text: &str,
) -> FrameOutcome {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(user_id = %sender_id, error = %e, "Undecodable chat frame");
            return FrameOutcome::Ignored;
        }
    };

    if frame.is_typing() {
        return forward_typing(state, sender_id, &frame.receiver_id);
    }

    if let Err(reason) = validate_body(&frame.message) {
        tracing::debug!(user_id = %sender_id, reason, "Chat message rejected");
        return reject(own, reason);
    }

    let receiver_id = frame.receiver_id;
    let allowed = {
        let (a, b) = (sender_id.to_string(), receiver_id.clone());
        store::blocking(&state.db, move |conn| can_private_message(conn, &a, &b)).await
    };
    match allowed {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(
                user_id = %sender_id,
                receiver_id = %receiver_id,
                "Chat not permitted between users"
            );
            return reject(own, ERR_NOT_FOLLOWING);
        }
        Err(e) => {
            tracing::error!(user_id = %sender_id, error = %e, "Permission check failed");
            return reject(own, ERR_NOT_FOLLOWING);
        }
    }

    let msg = ChatMessage {
        id: uuid::Uuid::now_v7().to_string(),
        sender_id: sender_id.to_string(),
        receiver_id,
        message: frame.message,
        created_at: now_rfc3339(),
        read: false,
    };

    // Best effort: a failed write is logged and live delivery still goes ahead.
    let (persisted, sender_name) = {
        let row = msg.clone();
        store::blocking(&state.db, move |conn| {
            let persisted = store::persist_message(conn, &row);
            let name = store::sender_nickname(conn, &row.sender_id).ok().flatten();
            Ok((persisted, name))
        })
        .await
        .unwrap_or_else(|e| (Err(e), None))
    };
    if let Err(e) = persisted {
        tracing::error!(
            user_id = %sender_id,
            message_id = %msg.id,
            error = %e,
            "Failed to persist chat message"
        );
    }

    let Some(receiver) = state.registry.lookup(Role::Chat, &msg.receiver_id) else {
        tracing::debug!(receiver_id = %msg.receiver_id, "Receiver not connected");
        return FrameOutcome::Stored;
    };

    let outbound = OutboundMessage::new(&msg, sender_name.unwrap_or_else(|| msg.sender_id.clone()));
    if text_frame(&outbound).is_some_and(|frame| receiver.send(frame)) {
        FrameOutcome::Delivered
    } else {
        tracing::debug!(receiver_id = %msg.receiver_id, "Receiver socket closed before delivery");
        FrameOutcome::Stored
    }
}

fn forward_typing(state: &AppState, sender_id: &str, receiver_id: &str) -> FrameOutcome {
    let Some(receiver) = state.registry.lookup(Role::Chat, receiver_id) else {
        return FrameOutcome::TypingDropped;
    };
    if text_frame(&TypingSignal::from_sender(sender_id)).is_some_and(|frame| receiver.send(frame)) {
        FrameOutcome::TypingForwarded
    } else {
        FrameOutcome::TypingDropped
    }
}

fn reject(own: &ConnectionHandle, reason: &'static str) -> FrameOutcome {
    if let Some(frame) = error_frame(reason) {
        own.send(frame);
    }
    FrameOutcome::Rejected(reason)
}
