/// Database row types for the chat and presence tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use serde::{Deserialize, Serialize};

/// Private chat message row (private_chat_messages)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub created_at: String,
    pub read: bool,
}

/// Group chat message row (group_chat_messages)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChatMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub message: String,
    pub created_at: String,
}

/// Persisted presence state, one row per user (user_status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// One entry of a user's friend list with live status.
/// Friends are users joined by an accepted follow edge in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendStatus {
    pub id: String,
    pub nickname: String,
    pub avatar: String,
    pub online: bool,
}

/// Follow edge states (followers.status)
pub const FOLLOW_ACCEPTED: &str = "accepted";
pub const FOLLOW_PENDING: &str = "pending";
