//! In-memory [`ChatApi`] used by the store and connection tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use parley_shared::models::{Chat, Message, NewMessage, ReconciliationBatch, StatusReceipt};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::{MessageStatus, Transition};

use crate::api::ChatApi;
use crate::error::{ClientError, Result};

#[derive(Default)]
pub struct FakeApi {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    chats: Vec<Chat>,
    messages: HashMap<MessageId, Message>,
    status_calls: Vec<(MessageId, MessageStatus)>,
    failing_status: HashSet<MessageId>,
    fail_create: bool,
}

fn server_error(status: u16, message: &str) -> ClientError {
    ClientError::Server {
        status,
        message: message.into(),
    }
}

impl FakeApi {
    pub fn with_chat(a: UserId, b: UserId) -> (Self, Chat) {
        let api = Self::default();
        let now = Utc::now();
        let mut users = [a, b];
        users.sort();
        let chat = Chat {
            id: ChatId::new(),
            users,
            created_at: now,
            updated_at: now,
        };
        api.lock().chats.push(chat.clone());
        (api, chat)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Store a message as if its author had posted it.
    pub fn seed_message(&self, chat: &Chat, sender: UserId, content: &str) -> Message {
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: sender,
            content: content.into(),
            attachment: None,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };
        self.lock().messages.insert(message.id, message.clone());
        message
    }

    pub fn stored_status(&self, id: MessageId) -> Option<MessageStatus> {
        self.lock().messages.get(&id).map(|m| m.status)
    }

    pub fn status_calls(&self) -> Vec<(MessageId, MessageStatus)> {
        self.lock().status_calls.clone()
    }

    pub fn fail_status_for(&self, id: MessageId, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.failing_status.insert(id);
        } else {
            inner.failing_status.remove(&id);
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn create_chat(&self, a: UserId, b: UserId) -> Result<Chat> {
        let mut inner = self.lock();
        if let Some(chat) = inner.chats.iter().find(|c| c.has_member(a) && c.has_member(b)) {
            return Ok(chat.clone());
        }
        let now = Utc::now();
        let mut users = [a, b];
        users.sort();
        let chat = Chat {
            id: ChatId::new(),
            users,
            created_at: now,
            updated_at: now,
        };
        inner.chats.push(chat.clone());
        Ok(chat)
    }

    async fn chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        Ok(self
            .lock()
            .chats
            .iter()
            .filter(|c| c.has_member(user_id))
            .cloned()
            .collect())
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        let mut inner = self.lock();
        if inner.fail_create {
            return Err(server_error(500, "Storage error"));
        }
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            content: new.content,
            attachment: new.attachment,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let mut list: Vec<Message> = self
            .lock()
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        list.sort_by_key(|m| m.created_at);
        Ok(list)
    }

    async fn update_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusReceipt> {
        let mut inner = self.lock();
        inner.status_calls.push((message_id, status));
        if inner.failing_status.contains(&message_id) {
            return Err(server_error(500, "Storage error"));
        }
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| server_error(404, "Not found"))?;
        let transition = message.status.advance(status);
        if let Transition::Advanced { to, .. } = transition {
            message.status = to;
        }
        Ok(StatusReceipt {
            message_id,
            status: message.status,
            advanced: transition.is_advanced(),
        })
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<Message> {
        self.lock()
            .messages
            .remove(&message_id)
            .ok_or_else(|| server_error(404, "Not found"))
    }

    async fn reconcile(&self, _user_id: UserId) -> Result<ReconciliationBatch> {
        Ok(ReconciliationBatch::default())
    }
}
