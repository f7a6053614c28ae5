//! Domain models shared by the store, the server and the client.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names so it can go over REST and the live channel unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::MessageStatus;
use crate::types::{ChatId, ConnectionId, MessageId, NotificationId, UserId};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-party conversation. Membership never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// The two participants, stored in ascending order.
    pub users: [UserId; 2],
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    /// The participant that is not `user`, if `user` belongs to the chat.
    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        match self.users {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Reference to an externally uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub key: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the author when creating a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// Outcome of a status promotion request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReceipt {
    pub message_id: MessageId,
    /// Stored status after the request, whether or not it moved.
    pub status: MessageStatus,
    pub advanced: bool,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Client-visible projection of an incoming message. Never persisted.
///
/// Two notifications may point at the same message (one live, one
/// regenerated on reconnect); consumers merge on `message_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub sender_id: UserId,
    pub chat_id: ChatId,
    pub content: String,
    pub message_id: MessageId,
    pub is_read: bool,
    pub date: DateTime<Utc>,
}

impl Notification {
    /// Unread notification dated at the message's creation time.
    pub fn for_message(message: &Message) -> Self {
        Self::at(message, message.created_at)
    }

    pub fn at(message: &Message, date: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::new(),
            sender_id: message.sender_id,
            chat_id: message.chat_id,
            content: message.content.clone(),
            message_id: message.id,
            is_read: false,
            date,
        }
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Result of one reconciliation pass for a returning user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationBatch {
    pub notifications: Vec<Notification>,
    /// The messages promoted to `DELIVERED`, in the order they were found.
    pub messages: Vec<Message>,
}

impl ReconciliationBatch {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.messages.is_empty()
    }
}
