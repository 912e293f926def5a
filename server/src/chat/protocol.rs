//! JSON wire envelopes exchanged on the chat sockets.
//!
//! Decoding is tolerant: unknown fields are ignored and missing fields take
//! their defaults, so older servers keep accepting frames from newer clients.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::db::models::{ChatMessage, GroupChatMessage};

/// Upper bound on whitespace-separated words in one message body.
pub const MAX_MESSAGE_WORDS: usize = 200;

pub const FRAME_TYPE_MESSAGE: &str = "message";
pub const FRAME_TYPE_TYPING: &str = "typing";

pub const ERR_TOO_LONG: &str = "Message cannot exceed 200 words";
pub const ERR_EMPTY: &str = "Message cannot be empty";
pub const ERR_NOT_FOLLOWING: &str = "Chat not permitted: you must follow each other to chat.";

/// Text frames sent before closing a rejected upgrade.
pub const REJECT_UNAUTHORIZED: &str = "Unauthorized";
pub const REJECT_MISSING_GROUP: &str = "Missing group_id";
pub const REJECT_NOT_MEMBER: &str = "Not a member of this group";

/// A frame as sent by the client. `id`, `sender_id` and `created_at` are
/// accepted but always replaced by server values before use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundFrame {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub group_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Anything that is not a typing indicator is handled as a regular message.
    pub fn is_typing(&self) -> bool {
        self.kind == FRAME_TYPE_TYPING
    }
}

/// A private message as forwarded to the receiver's chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    pub sender_name: String,
}

impl OutboundMessage {
    pub fn new(msg: &ChatMessage, sender_name: String) -> Self {
        Self {
            id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            receiver_id: msg.receiver_id.clone(),
            message: msg.message.clone(),
            kind: FRAME_TYPE_MESSAGE.to_string(),
            created_at: msg.created_at.clone(),
            sender_name,
        }
    }
}

/// A group message as broadcast to every socket joined to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundGroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    pub sender_name: String,
}

impl OutboundGroupMessage {
    pub fn new(msg: &GroupChatMessage, sender_name: String) -> Self {
        Self {
            id: msg.id.clone(),
            group_id: msg.group_id.clone(),
            sender_id: msg.sender_id.clone(),
            message: msg.message.clone(),
            kind: FRAME_TYPE_MESSAGE.to_string(),
            created_at: msg.created_at.clone(),
            sender_name,
        }
    }
}

/// Fire-and-forget typing indicator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_id: String,
}

impl TypingSignal {
    pub fn from_sender(sender_id: &str) -> Self {
        Self {
            kind: FRAME_TYPE_TYPING.to_string(),
            sender_id: sender_id.to_string(),
        }
    }
}

/// Inline error; the socket stays open after it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}

/// Validate a message body, returning the inline error text on rejection.
pub fn validate_body(body: &str) -> Result<(), &'static str> {
    match word_count(body) {
        0 => Err(ERR_EMPTY),
        n if n > MAX_MESSAGE_WORDS => Err(ERR_TOO_LONG),
        _ => Ok(()),
    }
}

/// Serialize a payload into a text frame.
pub fn text_frame<T: Serialize>(payload: &T) -> Option<Message> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound frame");
            None
        }
    }
}

pub fn error_frame(message: &str) -> Option<Message> {
    text_frame(&ErrorFrame {
        error: message.to_string(),
    })
}
