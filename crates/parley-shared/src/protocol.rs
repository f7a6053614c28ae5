use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_EVENT_SIZE;
use crate::error::ProtocolError;
use crate::models::{Attachment, Message, Notification, PresenceEntry, ReconciliationBatch};
use crate::status::MessageStatus;
use crate::types::{ChatId, MessageId, UserId};

/// Events a client sends over its live connection.
///
/// Encoded as JSON text frames: `{"event": "send-message", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind this connection to a user
    RegisterPresence(RegisterPresence),

    /// Relay an already persisted message to its recipient
    SendMessage(MessageRelay),

    /// Relay a persisted status change to the other participant
    StatusChanged(StatusChanged),

    /// Relay a persisted deletion to the other participant
    MessageDeleted(DeletionNotice),
}

/// Events the server pushes down a live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full set of reachable users after any register/unregister
    PresenceChanged(PresenceChanged),

    MessageReceived(MessageRelay),

    /// Transient notification accompanying a live message
    Notification(Notification),

    StatusUpdate(StatusUpdate),

    MessageDeleted(MessageDeleted),

    /// Reconciliation output for the user that just registered
    Backlog(ReconciliationBatch),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPresence {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChanged {
    pub online_users: Vec<PresenceEntry>,
}

/// A persisted message on its way to the recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRelay {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub recipient_id: UserId,
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRelay {
    pub fn from_message(message: &Message, recipient_id: UserId) -> Self {
        Self {
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            recipient_id,
            message_id: message.id,
            attachment: message.attachment.clone(),
            created_at: Some(message.created_at),
        }
    }

    /// Rebuild the message as the recipient sees it on arrival (`SENT`).
    pub fn to_message(&self, received_at: DateTime<Utc>) -> Message {
        let created_at = self.created_at.unwrap_or(received_at);
        Message {
            id: self.message_id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content.clone(),
            attachment: self.attachment.clone(),
            status: MessageStatus::Sent,
            created_at,
            updated_at: created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub new_status: MessageStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: MessageId,
    pub new_status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
    pub chat_id: ChatId,
}

fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            max: MAX_EVENT_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterPresence(_) => "register-presence",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::StatusChanged(_) => "status-changed",
            ClientEvent::MessageDeleted(_) => "message-deleted",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PresenceChanged(_) => "presence-changed",
            ServerEvent::MessageReceived(_) => "message-received",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::StatusUpdate(_) => "status-update",
            ServerEvent::MessageDeleted(_) => "message-deleted",
            ServerEvent::Backlog(_) => "backlog",
        }
    }
}
