use serde::Serialize;
use tokio::sync::broadcast;

use parley_shared::models::Message;
use parley_shared::types::{ChatId, MessageId, UserId};

/// Capacity of the observer channel. Slow observers see `Lagged`.
pub const EVENT_CAPACITY: usize = 256;

/// Change notifications for UI observers of a [`SyncStore`](crate::store::SyncStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum StoreEvent {
    PresenceChanged { online: Vec<UserId> },
    /// A cached message was added or its status moved.
    MessageUpdated(Message),
    MessageRemoved { message_id: MessageId, chat_id: ChatId },
    NotificationsChanged { unread: usize },
    ChatsRefreshed,
    ChatOpened(ChatId),
    ChatClosed,
    Connected,
    Disconnected,
}

pub fn emit_event(tx: &broadcast::Sender<StoreEvent>, event: StoreEvent) {
    // Err only means nobody is subscribed.
    if tx.send(event).is_err() {
        tracing::trace!("No store observers");
    }
}
