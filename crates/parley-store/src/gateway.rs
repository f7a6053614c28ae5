//! The narrow persistence interface consumed by the live layer.
//!
//! [`PersistenceGateway`] is what the server's status, reconciliation and
//! REST code talk to. [`SqliteGateway`] implements it over a [`Database`]
//! behind a mutex, running every call on the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_shared::models::{Chat, Message, NewMessage};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::{MessageStatus, Transition};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Row-level atomic storage of chats and messages.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a new message in `SENT` state.
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>>;

    async fn get_message(&self, id: MessageId) -> Result<Message>;

    /// Forward-only status write. Returns what happened and the row after it.
    async fn update_status(
        &self,
        id: MessageId,
        requested: MessageStatus,
    ) -> Result<(Transition, Message)>;

    async fn delete_message(&self, id: MessageId) -> Result<Message>;

    async fn chats_for_user(&self, user: UserId) -> Result<Vec<Chat>>;

    async fn get_chat(&self, id: ChatId) -> Result<Chat>;

    /// Lazily create the chat between two users. `true` when newly created.
    async fn find_or_create_chat(&self, a: UserId, b: UserId) -> Result<(Chat, bool)>;
}

/// [`PersistenceGateway`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteGateway {
    db: Arc<Mutex<Database>>,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.with_db(move |db| db.insert_message(&new)).await
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.with_db(move |db| db.get_messages_for_chat(chat_id))
            .await
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.with_db(move |db| db.get_message_by_id(id)).await
    }

    async fn update_status(
        &self,
        id: MessageId,
        requested: MessageStatus,
    ) -> Result<(Transition, Message)> {
        self.with_db(move |db| db.update_message_status(id, requested))
            .await
    }

    async fn delete_message(&self, id: MessageId) -> Result<Message> {
        self.with_db(move |db| db.delete_message(id)).await
    }

    async fn chats_for_user(&self, user: UserId) -> Result<Vec<Chat>> {
        self.with_db(move |db| db.chats_for_user(user)).await
    }

    async fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.with_db(move |db| db.get_chat(id)).await
    }

    async fn find_or_create_chat(&self, a: UserId, b: UserId) -> Result<(Chat, bool)> {
        self.with_db(move |db| db.find_or_create_chat(a, b)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_promotions_settle_on_read() {
        let gateway = SqliteGateway::new(Database::open_in_memory().unwrap());
        let (a, b) = (UserId::new(), UserId::new());
        let (chat, _) = gateway.find_or_create_chat(a, b).await.unwrap();
        let message = gateway
            .create_message(NewMessage {
                chat_id: chat.id,
                sender_id: a,
                content: "race".into(),
                attachment: None,
            })
            .await
            .unwrap();

        let delivered = {
            let g = gateway.clone();
            tokio::spawn(async move { g.update_status(message.id, MessageStatus::Delivered).await })
        };
        let read = {
            let g = gateway.clone();
            tokio::spawn(async move { g.update_status(message.id, MessageStatus::Read).await })
        };

        let (_, read_result) = read.await.unwrap().unwrap();
        delivered.await.unwrap().unwrap();
        assert_eq!(read_result.status, MessageStatus::Read);
        assert_eq!(
            gateway.get_message(message.id).await.unwrap().status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn on_disk_gateway_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("gw.db")).unwrap();
        let gateway = SqliteGateway::new(db);
        let (a, b) = (UserId::new(), UserId::new());

        let (chat, created) = gateway.find_or_create_chat(a, b).await.unwrap();
        assert!(created);
        assert_eq!(gateway.get_chat(chat.id).await.unwrap(), chat);
        assert_eq!(gateway.chats_for_user(b).await.unwrap().len(), 1);
        assert!(gateway.messages_for_chat(chat.id).await.unwrap().is_empty());
    }
}
