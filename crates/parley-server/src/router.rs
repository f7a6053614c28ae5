//! Relays persisted changes to whichever connections a user currently has.
//!
//! The router never touches storage. A route that reaches zero connections
//! is a transient relay failure, not an error.

use chrono::Utc;
use tracing::debug;

use parley_shared::models::{Message, Notification};
use parley_shared::protocol::{MessageDeleted, MessageRelay, ServerEvent, StatusUpdate};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::MessageStatus;

use crate::presence::{deliver, PresenceRegistry};

#[derive(Clone)]
pub struct EventRouter {
    presence: PresenceRegistry,
}

impl EventRouter {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self { presence }
    }

    /// Deliver `message-received` then a fresh `notification` to every
    /// connection of `recipient_id`. Returns connections reached.
    pub async fn route_message(&self, message: &Message, recipient_id: UserId) -> usize {
        let targets = self.presence.outbound_for(recipient_id).await;
        if targets.is_empty() {
            debug!(msg = %message.id, recipient = %recipient_id, "Recipient offline, relay skipped");
            return 0;
        }

        let relay = MessageRelay::from_message(message, recipient_id);
        let received = ServerEvent::MessageReceived(relay);
        let notification = ServerEvent::Notification(Notification::at(message, Utc::now()));

        let reached = deliver(&targets, &received);
        deliver(&targets, &notification);
        debug!(msg = %message.id, recipient = %recipient_id, reached, "Message relayed");
        reached
    }

    pub async fn route_status_update(
        &self,
        message_id: MessageId,
        new_status: MessageStatus,
        recipient_id: UserId,
    ) -> usize {
        let targets = self.presence.outbound_for(recipient_id).await;
        let event = ServerEvent::StatusUpdate(StatusUpdate {
            message_id,
            new_status,
        });
        let reached = deliver(&targets, &event);
        debug!(msg = %message_id, status = %new_status, recipient = %recipient_id, reached, "Status relayed");
        reached
    }

    pub async fn route_deletion(
        &self,
        message_id: MessageId,
        chat_id: ChatId,
        recipient_id: UserId,
    ) -> usize {
        let targets = self.presence.outbound_for(recipient_id).await;
        let event = ServerEvent::MessageDeleted(MessageDeleted {
            message_id,
            chat_id,
        });
        let reached = deliver(&targets, &event);
        debug!(msg = %message_id, recipient = %recipient_id, reached, "Deletion relayed");
        reached
    }
}
