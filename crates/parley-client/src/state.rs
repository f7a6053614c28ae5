//! Per-session client state.
//!
//! [`SyncState`] is plain data guarded by the [`SyncStore`](crate::store::SyncStore)'s
//! mutex. Nothing here does I/O.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use parley_shared::models::{Chat, Message, Notification, PresenceEntry};
use parley_shared::protocol::ClientEvent;
use parley_shared::types::{ChatId, MessageId, NotificationId, UserId};
use parley_shared::{MessageStatus, Transition};

pub struct SyncState {
    /// The signed-in user this session belongs to.
    pub user_id: UserId,

    /// Users with at least one live connection.
    online: HashSet<UserId>,

    /// Notification list, merged by `message_id`.
    notifications: Vec<Notification>,

    open_chat: Option<ChatId>,

    /// Cached history per chat, ordered by creation time.
    messages: HashMap<ChatId, Vec<Message>>,

    /// Chat summaries, most recently active first.
    chats: Vec<Chat>,

    /// Live channel to the server, present while connected.
    pub outbound: Option<mpsc::Sender<ClientEvent>>,
}

impl SyncState {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            online: HashSet::new(),
            notifications: Vec::new(),
            open_chat: None,
            messages: HashMap::new(),
            chats: Vec::new(),
            outbound: None,
        }
    }

    // -- presence ----------------------------------------------------------

    /// Replace the reachable set. Returns it sorted.
    pub fn set_presence(&mut self, entries: &[PresenceEntry]) -> Vec<UserId> {
        self.online = entries.iter().map(|e| e.user_id).collect();
        let mut online: Vec<UserId> = self.online.iter().copied().collect();
        online.sort();
        online
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(&user_id)
    }

    // -- chats -------------------------------------------------------------

    pub fn open_chat(&self) -> Option<ChatId> {
        self.open_chat
    }

    pub fn set_open_chat(&mut self, chat_id: Option<ChatId>) {
        self.open_chat = chat_id;
    }

    pub fn is_open(&self, chat_id: ChatId) -> bool {
        self.open_chat == Some(chat_id)
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn set_chats(&mut self, chats: Vec<Chat>) {
        self.chats = chats;
    }

    /// The other participant of a known chat.
    pub fn peer_in(&self, chat_id: ChatId) -> Option<UserId> {
        self.chats
            .iter()
            .find(|c| c.id == chat_id)
            .and_then(|c| c.peer_of(self.user_id))
    }

    // -- messages ----------------------------------------------------------

    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.messages.get(&chat_id).cloned().unwrap_or_default()
    }

    pub fn find_message(&self, message_id: MessageId) -> Option<&Message> {
        self.messages
            .values()
            .flat_map(|list| list.iter())
            .find(|m| m.id == message_id)
    }

    /// Insert or merge a message, keeping the forward-most status.
    /// Returns the cached copy when anything changed.
    pub fn upsert_message(&mut self, message: Message) -> Option<Message> {
        let list = self.messages.entry(message.chat_id).or_default();
        if let Some(cached) = list.iter_mut().find(|m| m.id == message.id) {
            return match cached.status.advance(message.status) {
                Transition::Advanced { to, .. } => {
                    cached.status = to;
                    cached.updated_at = message.updated_at;
                    Some(cached.clone())
                }
                Transition::Unchanged(_) => None,
            };
        }

        let at = list
            .iter()
            .position(|m| m.created_at > message.created_at)
            .unwrap_or(list.len());
        list.insert(at, message.clone());
        Some(message)
    }

    /// Forward-only status change on a cached message.
    pub fn apply_status(
        &mut self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Option<Message> {
        let cached = self
            .messages
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| m.id == message_id)?;
        match cached.status.advance(status) {
            Transition::Advanced { to, .. } => {
                cached.status = to;
                Some(cached.clone())
            }
            Transition::Unchanged(_) => None,
        }
    }

    pub fn remove_message(&mut self, message_id: MessageId) -> Option<Message> {
        for list in self.messages.values_mut() {
            if let Some(at) = list.iter().position(|m| m.id == message_id) {
                return Some(list.remove(at));
            }
        }
        None
    }

    // -- notifications -----------------------------------------------------

    /// Add unless one for the same message exists. Returns whether added.
    pub fn merge_notification(&mut self, notification: Notification) -> bool {
        if self
            .notifications
            .iter()
            .any(|n| n.message_id == notification.message_id)
        {
            return false;
        }
        self.notifications.push(notification);
        true
    }

    pub fn remove_notification_for(&mut self, message_id: MessageId) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.message_id != message_id);
        self.notifications.len() != before
    }

    /// Messages with a pending notification in `chat_id`, sent by `peer` when known.
    pub fn notified_messages(&self, chat_id: ChatId, peer: Option<UserId>) -> Vec<MessageId> {
        self.notifications
            .iter()
            .filter(|n| n.chat_id == chat_id && peer.map_or(true, |p| n.sender_id == p))
            .map(|n| n.message_id)
            .collect()
    }

    /// Unread notifications, newest first.
    pub fn unread(&self) -> Vec<Notification> {
        let mut unread: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| !n.is_read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.date.cmp(&a.date));
        unread
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn mark_notification_read(&mut self, id: NotificationId) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }
}
