//! Client-side synchronization store.
//!
//! Owns the session's view of presence, notifications, the open chat and
//! cached history. Server events are applied through the `apply_*` methods
//! (normally by [`run_subscription`](crate::connection::run_subscription));
//! user actions go through the REST [`ChatApi`] first and are relayed over
//! the live channel afterwards.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use parley_shared::models::{
    Chat, Message, NewMessage, Notification, PresenceEntry, ReconciliationBatch, StatusReceipt,
};
use parley_shared::protocol::{ClientEvent, DeletionNotice, MessageRelay, ServerEvent};
use parley_shared::types::{ChatId, MessageId, NotificationId, UserId};
use parley_shared::MessageStatus;

use crate::api::{ChatApi, Draft};
use crate::error::{ClientError, Result};
use crate::events::{emit_event, StoreEvent, EVENT_CAPACITY};
use crate::state::SyncState;

/// Outcome of [`SyncStore::mark_chat_opened`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenChatReport {
    /// Promoted to `READ`; their notifications were removed.
    pub promoted: Vec<MessageId>,
    /// Promotion failed; the notification stays for a later retry.
    pub failed: Vec<MessageId>,
}

#[derive(Clone)]
pub struct SyncStore {
    user_id: UserId,
    api: Arc<dyn ChatApi>,
    state: Arc<Mutex<SyncState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SyncStore {
    pub fn new(user_id: UserId, api: Arc<dyn ChatApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            user_id,
            api,
            state: Arc::new(Mutex::new(SyncState::new(user_id))),
            events,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        emit_event(&self.events, event);
    }

    // -----------------------------------------------------------------------
    // Live channel
    // -----------------------------------------------------------------------

    pub(crate) async fn attach(&self, outbound: mpsc::Sender<ClientEvent>) {
        self.state.lock().await.outbound = Some(outbound);
        self.emit(StoreEvent::Connected);
    }

    /// Drop the live channel. Presence is unknown until the next connection.
    pub(crate) async fn detach(&self) {
        {
            let mut state = self.state.lock().await;
            state.outbound = None;
            state.set_presence(&[]);
        }
        self.emit(StoreEvent::Disconnected);
        self.emit(StoreEvent::PresenceChanged { online: Vec::new() });
    }

    /// Send over the live channel if connected. Missing relays are caught
    /// up by reconciliation on the peer's side.
    async fn relay(&self, event: ClientEvent) {
        let outbound = self.state.lock().await.outbound.clone();
        match outbound {
            Some(tx) => {
                let name = event.name();
                if tx.send(event).await.is_err() {
                    debug!(event = name, "Live channel closed, relay skipped");
                }
            }
            None => debug!(event = event.name(), "Not connected, relay skipped"),
        }
    }

    /// Apply one server event.
    pub async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::PresenceChanged(p) => self.apply_presence(&p.online_users).await,
            ServerEvent::MessageReceived(relay) => {
                self.apply_incoming_message(relay.to_message(Utc::now()))
                    .await
            }
            ServerEvent::Notification(n) => self.apply_notification(n).await,
            ServerEvent::StatusUpdate(u) => {
                self.apply_status_update(u.message_id, u.new_status).await
            }
            ServerEvent::MessageDeleted(d) => self.apply_deletion(d.message_id, d.chat_id).await,
            ServerEvent::Backlog(batch) => self.apply_backlog(batch).await,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub async fn apply_presence(&self, entries: &[PresenceEntry]) {
        let online = self.state.lock().await.set_presence(entries);
        self.emit(StoreEvent::PresenceChanged { online });
    }

    /// A message just arrived live. Read on arrival when its chat is open,
    /// otherwise notified and acknowledged as delivered.
    pub async fn apply_incoming_message(&self, message: Message) {
        let from_peer = message.sender_id != self.user_id;
        let (chat_open, unread) = {
            let mut state = self.state.lock().await;
            let chat_open = state.is_open(message.chat_id);
            if let Some(cached) = state.upsert_message(message.clone()) {
                self.emit(StoreEvent::MessageUpdated(cached));
            }
            let notified = from_peer
                && !chat_open
                && state.merge_notification(Notification::at(&message, Utc::now()));
            (chat_open, notified.then(|| state.unread_count()))
        };
        if let Some(unread) = unread {
            self.emit(StoreEvent::NotificationsChanged { unread });
        }

        if from_peer {
            let target = if chat_open {
                MessageStatus::Read
            } else {
                MessageStatus::Delivered
            };
            if let Err(e) = self.request_status(message.id, target).await {
                warn!(msg = %message.id, status = %target, error = %e, "Status promotion failed");
            }
        }

        if let Err(e) = self.refresh_chats().await {
            warn!(error = %e, "Failed to refresh chats");
        }
    }

    /// Merge a server notification unless its chat is open.
    pub async fn apply_notification(&self, notification: Notification) {
        let unread = {
            let mut state = self.state.lock().await;
            if state.is_open(notification.chat_id) || !state.merge_notification(notification) {
                return;
            }
            state.unread_count()
        };
        self.emit(StoreEvent::NotificationsChanged { unread });
    }

    /// Merge a reconciliation batch. Messages of the open chat are read
    /// immediately instead of notified.
    pub async fn apply_backlog(&self, batch: ReconciliationBatch) {
        let (read_now, unread) = {
            let mut state = self.state.lock().await;
            for message in batch.messages {
                if let Some(cached) = state.upsert_message(message) {
                    self.emit(StoreEvent::MessageUpdated(cached));
                }
            }
            let mut read_now = Vec::new();
            for notification in batch.notifications {
                if state.is_open(notification.chat_id) {
                    read_now.push(notification.message_id);
                } else {
                    state.merge_notification(notification);
                }
            }
            (read_now, state.unread_count())
        };
        self.emit(StoreEvent::NotificationsChanged { unread });

        for id in read_now {
            if let Err(e) = self.request_status(id, MessageStatus::Read).await {
                warn!(msg = %id, error = %e, "Status promotion failed");
            }
        }
    }

    pub async fn apply_status_update(&self, message_id: MessageId, status: MessageStatus) {
        let updated = self.state.lock().await.apply_status(message_id, status);
        match updated {
            Some(message) => self.emit(StoreEvent::MessageUpdated(message)),
            None => debug!(msg = %message_id, %status, "Status update not applied"),
        }
    }

    pub async fn apply_deletion(&self, message_id: MessageId, chat_id: ChatId) {
        let unread = {
            let mut state = self.state.lock().await;
            state.remove_message(message_id);
            state
                .remove_notification_for(message_id)
                .then(|| state.unread_count())
        };
        self.emit(StoreEvent::MessageRemoved {
            message_id,
            chat_id,
        });
        if let Some(unread) = unread {
            self.emit(StoreEvent::NotificationsChanged { unread });
        }
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Ask the server to promote a message and mirror the stored result.
    async fn request_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusReceipt> {
        let receipt = self.api.update_status(message_id, status).await?;
        let updated = self
            .state
            .lock()
            .await
            .apply_status(message_id, receipt.status);
        if let Some(message) = updated {
            self.emit(StoreEvent::MessageUpdated(message));
        }
        Ok(receipt)
    }

    /// Open `chat_id` and read every message the peer sent while it was closed.
    pub async fn mark_chat_opened(&self, chat_id: ChatId) -> OpenChatReport {
        let pending = {
            let mut state = self.state.lock().await;
            state.set_open_chat(Some(chat_id));
            let peer = state.peer_in(chat_id);
            state.notified_messages(chat_id, peer)
        };
        self.emit(StoreEvent::ChatOpened(chat_id));

        let mut report = OpenChatReport::default();
        for id in pending {
            match self.request_status(id, MessageStatus::Read).await {
                Ok(_) => {
                    self.state.lock().await.remove_notification_for(id);
                    report.promoted.push(id);
                }
                Err(e) if e.is_not_found() => {
                    debug!(msg = %id, "Notified message no longer exists");
                    self.state.lock().await.remove_notification_for(id);
                }
                Err(e) => {
                    warn!(msg = %id, error = %e, "Failed to mark message read");
                    report.failed.push(id);
                }
            }
        }

        let unread = self.state.lock().await.unread_count();
        self.emit(StoreEvent::NotificationsChanged { unread });
        if !report.promoted.is_empty() {
            info!(chat = %chat_id, read = report.promoted.len(), "Chat opened");
        }
        report
    }

    pub async fn close_chat(&self) {
        self.state.lock().await.set_open_chat(None);
        self.emit(StoreEvent::ChatClosed);
    }

    /// Fetch history and merge it into the cache.
    pub async fn load_history(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let fetched = self.api.messages_for_chat(chat_id).await?;
        let mut state = self.state.lock().await;
        for message in fetched {
            state.upsert_message(message);
        }
        Ok(state.messages(chat_id))
    }

    pub async fn refresh_chats(&self) -> Result<Vec<Chat>> {
        let chats = self.api.chats_for_user(self.user_id).await?;
        self.state.lock().await.set_chats(chats.clone());
        self.emit(StoreEvent::ChatsRefreshed);
        Ok(chats)
    }

    /// Find or create the chat with `peer`.
    pub async fn start_chat(&self, peer: UserId) -> Result<Chat> {
        let chat = self.api.create_chat(self.user_id, peer).await?;
        self.refresh_chats().await?;
        Ok(chat)
    }

    async fn peer_in(&self, chat_id: ChatId) -> Result<UserId> {
        if let Some(peer) = self.state.lock().await.peer_in(chat_id) {
            return Ok(peer);
        }
        self.refresh_chats().await?;
        self.state
            .lock()
            .await
            .peer_in(chat_id)
            .ok_or_else(|| ClientError::UnknownChat(chat_id.to_string()))
    }

    /// Show a `SENDING` copy, persist through REST, swap in the stored
    /// `SENT` copy, then relay it live to the peer.
    pub async fn send_message(&self, chat_id: ChatId, draft: Draft) -> Result<Message> {
        if draft.content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let peer = self.peer_in(chat_id).await?;

        let now = Utc::now();
        let local = Message {
            id: MessageId::new(),
            chat_id,
            sender_id: self.user_id,
            content: draft.content.clone(),
            attachment: draft.attachment.clone(),
            status: MessageStatus::Sending,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.upsert_message(local.clone());
        self.emit(StoreEvent::MessageUpdated(local.clone()));

        let created = self
            .api
            .create_message(NewMessage {
                chat_id,
                sender_id: self.user_id,
                content: draft.content,
                attachment: draft.attachment,
            })
            .await;

        {
            let mut state = self.state.lock().await;
            state.remove_message(local.id);
            if let Ok(stored) = &created {
                state.upsert_message(stored.clone());
            }
        }
        self.emit(StoreEvent::MessageRemoved {
            message_id: local.id,
            chat_id,
        });
        let stored = created?;
        self.emit(StoreEvent::MessageUpdated(stored.clone()));

        self.relay(ClientEvent::SendMessage(MessageRelay::from_message(&stored, peer)))
            .await;
        Ok(stored)
    }

    pub async fn delete_message(&self, message_id: MessageId) -> Result<Message> {
        let deleted = self.api.delete_message(message_id).await?;
        self.state.lock().await.remove_message(message_id);
        self.emit(StoreEvent::MessageRemoved {
            message_id,
            chat_id: deleted.chat_id,
        });

        match self.peer_in(deleted.chat_id).await {
            Ok(recipient_id) => {
                self.relay(ClientEvent::MessageDeleted(DeletionNotice {
                    message_id,
                    chat_id: deleted.chat_id,
                    recipient_id,
                }))
                .await
            }
            Err(e) => warn!(chat = %deleted.chat_id, error = %e, "Deletion not relayed"),
        }
        Ok(deleted)
    }

    /// Run reconciliation over REST, for sessions without a live channel.
    pub async fn reconcile_now(&self) -> Result<usize> {
        let batch = self.api.reconcile(self.user_id).await?;
        let count = batch.messages.len();
        self.apply_backlog(batch).await;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn unread_notifications(&self) -> Vec<Notification> {
        self.state.lock().await.unread()
    }

    pub async fn mark_notification_read(&self, id: NotificationId) -> bool {
        let (changed, unread) = {
            let mut state = self.state.lock().await;
            (state.mark_notification_read(id), state.unread_count())
        };
        if changed {
            self.emit(StoreEvent::NotificationsChanged { unread });
        }
        changed
    }

    pub async fn clear_notifications(&self) {
        self.state.lock().await.clear_notifications();
        self.emit(StoreEvent::NotificationsChanged { unread: 0 });
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().await.is_online(user_id)
    }

    pub async fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.state.lock().await.messages(chat_id)
    }

    pub async fn chats(&self) -> Vec<Chat> {
        self.state.lock().await.chats().to_vec()
    }

    pub async fn open_chat(&self) -> Option<ChatId> {
        self.state.lock().await.open_chat()
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::protocol::{PresenceChanged, StatusUpdate};
    use parley_shared::types::ConnectionId;

    use super::*;
    use crate::testing::FakeApi;

    struct Fixture {
        api: Arc<FakeApi>,
        store: SyncStore,
        chat: Chat,
        me: UserId,
        peer: UserId,
    }

    async fn fixture() -> Fixture {
        let (me, peer) = (UserId::new(), UserId::new());
        let (api, chat) = FakeApi::with_chat(me, peer);
        let api = Arc::new(api);
        let store = SyncStore::new(me, api.clone());
        store.refresh_chats().await.unwrap();
        Fixture {
            api,
            store,
            chat,
            me,
            peer,
        }
    }

    async fn connect(store: &SyncStore) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(16);
        store.attach(tx).await;
        rx
    }

    #[tokio::test]
    async fn test_incoming_message_in_closed_chat_is_notified_and_delivered() {
        let f = fixture().await;
        let msg = f.api.seed_message(&f.chat, f.peer, "hello");

        f.store.apply_incoming_message(msg.clone()).await;

        let unread = f.store.unread_notifications().await;
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].message_id, msg.id);
        assert_eq!(f.api.status_calls(), vec![(msg.id, MessageStatus::Delivered)]);
        assert_eq!(f.api.stored_status(msg.id), Some(MessageStatus::Delivered));
        assert_eq!(f.store.messages(f.chat.id).await[0].status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_incoming_message_in_open_chat_is_read_on_arrival() {
        let f = fixture().await;
        f.store.mark_chat_opened(f.chat.id).await;
        let msg = f.api.seed_message(&f.chat, f.peer, "you there?");

        f.store.apply_incoming_message(msg.clone()).await;

        assert!(f.store.unread_notifications().await.is_empty());
        assert_eq!(f.api.status_calls(), vec![(msg.id, MessageStatus::Read)]);
        assert_eq!(f.api.stored_status(msg.id), Some(MessageStatus::Read));
    }

    #[tokio::test]
    async fn test_live_notification_merges_with_incoming_message() {
        let f = fixture().await;
        let msg = f.api.seed_message(&f.chat, f.peer, "hi");

        f.store.apply_incoming_message(msg.clone()).await;
        f.store.apply_notification(Notification::for_message(&msg)).await;

        assert_eq!(f.store.unread_notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_opening_chat_reads_notified_messages() {
        let f = fixture().await;
        let first = f.api.seed_message(&f.chat, f.peer, "one");
        let second = f.api.seed_message(&f.chat, f.peer, "two");
        f.store.apply_incoming_message(first.clone()).await;
        f.store.apply_incoming_message(second.clone()).await;
        f.api.fail_status_for(second.id, true);

        let report = f.store.mark_chat_opened(f.chat.id).await;
        assert_eq!(report.promoted, vec![first.id]);
        assert_eq!(report.failed, vec![second.id]);
        assert_eq!(f.api.stored_status(first.id), Some(MessageStatus::Read));

        // The failed one is still pending and succeeds on retry.
        let unread = f.store.unread_notifications().await;
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].message_id, second.id);

        f.api.fail_status_for(second.id, false);
        let report = f.store.mark_chat_opened(f.chat.id).await;
        assert_eq!(report.promoted, vec![second.id]);
        assert!(f.store.unread_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_updates_only_move_forward() {
        let f = fixture().await;
        let (mut rx_events, mut outbound) = (f.store.subscribe(), connect(&f.store).await);
        let sent = f
            .store
            .send_message(f.chat.id, Draft::text("hello"))
            .await
            .unwrap();
        while outbound.try_recv().is_ok() {}

        f.store
            .dispatch(ServerEvent::StatusUpdate(StatusUpdate {
                message_id: sent.id,
                new_status: MessageStatus::Read,
            }))
            .await;
        f.store.apply_status_update(sent.id, MessageStatus::Delivered).await;

        assert_eq!(f.store.messages(f.chat.id).await[0].status, MessageStatus::Read);

        let mut saw_read = false;
        while let Ok(event) = rx_events.try_recv() {
            if let StoreEvent::MessageUpdated(m) = event {
                assert_ne!(
                    (m.id, m.status),
                    (sent.id, MessageStatus::Delivered),
                    "regressed status was published"
                );
                saw_read |= m.id == sent.id && m.status == MessageStatus::Read;
            }
        }
        assert!(saw_read);
    }

    #[tokio::test]
    async fn test_send_message_swaps_local_copy_and_relays() {
        let f = fixture().await;
        let mut outbound = connect(&f.store).await;
        let mut events = f.store.subscribe();

        let stored = f
            .store
            .send_message(f.chat.id, Draft::text("hello"))
            .await
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(f.store.messages(f.chat.id).await, vec![stored.clone()]);

        match events.try_recv().unwrap() {
            StoreEvent::MessageUpdated(local) => assert_eq!(local.status, MessageStatus::Sending),
            other => panic!("unexpected {other:?}"),
        }

        match outbound.try_recv().unwrap() {
            ClientEvent::SendMessage(relay) => {
                assert_eq!(relay.message_id, stored.id);
                assert_eq!(relay.sender_id, f.me);
                assert_eq!(relay.recipient_id, f.peer);
            }
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_failed_send_drops_local_copy() {
        let f = fixture().await;
        let mut outbound = connect(&f.store).await;
        f.api.fail_create(true);

        let err = f
            .store
            .send_message(f.chat.id, Draft::text("lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 500, .. }));
        assert!(f.store.messages(f.chat.id).await.is_empty());
        assert!(outbound.try_recv().is_err());

        assert!(matches!(
            f.store.send_message(f.chat.id, Draft::text("  ")).await,
            Err(ClientError::EmptyMessage)
        ));
        assert!(matches!(
            f.store.send_message(ChatId::new(), Draft::text("who?")).await,
            Err(ClientError::UnknownChat(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_message_relays_and_clears() {
        let f = fixture().await;
        let mut outbound = connect(&f.store).await;
        let stored = f
            .store
            .send_message(f.chat.id, Draft::text("oops"))
            .await
            .unwrap();
        outbound.try_recv().unwrap();

        f.store.delete_message(stored.id).await.unwrap();
        assert!(f.store.messages(f.chat.id).await.is_empty());
        assert_eq!(
            outbound.try_recv().unwrap(),
            ClientEvent::MessageDeleted(DeletionNotice {
                message_id: stored.id,
                chat_id: f.chat.id,
                recipient_id: f.peer,
            })
        );

        let err = f.store.delete_message(stored.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remote_deletion_drops_notification() {
        let f = fixture().await;
        let msg = f.api.seed_message(&f.chat, f.peer, "brb");
        f.store.apply_incoming_message(msg.clone()).await;

        f.store.apply_deletion(msg.id, f.chat.id).await;
        assert!(f.store.messages(f.chat.id).await.is_empty());
        assert!(f.store.unread_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_merges_without_duplicates() {
        let f = fixture().await;
        let msg = f.api.seed_message(&f.chat, f.peer, "while away");
        let delivered = Message {
            status: MessageStatus::Delivered,
            ..msg.clone()
        };
        let batch = ReconciliationBatch {
            notifications: vec![Notification::for_message(&delivered)],
            messages: vec![delivered.clone()],
        };

        f.store.apply_backlog(batch.clone()).await;
        f.store.apply_backlog(batch).await;

        assert_eq!(f.store.unread_notifications().await.len(), 1);
        assert_eq!(f.store.messages(f.chat.id).await, vec![delivered]);
        assert!(f.api.status_calls().is_empty());
    }

    #[tokio::test]
    async fn test_presence_and_notification_menu() {
        let f = fixture().await;
        f.store
            .dispatch(ServerEvent::PresenceChanged(PresenceChanged {
                online_users: vec![PresenceEntry {
                    user_id: f.peer,
                    connection_id: ConnectionId::new(),
                }],
            }))
            .await;
        assert!(f.store.is_online(f.peer).await);
        assert!(!f.store.is_online(f.me).await);

        let msg = f.api.seed_message(&f.chat, f.peer, "ping");
        f.store.apply_incoming_message(msg).await;
        let note = f.store.unread_notifications().await.remove(0);
        assert!(f.store.mark_notification_read(note.id).await);
        assert!(f.store.unread_notifications().await.is_empty());

        f.store.clear_notifications().await;
        f.store.detach().await;
        assert!(!f.store.is_online(f.peer).await);
    }

    #[tokio::test]
    async fn test_load_history_keeps_forward_most_status() {
        let f = fixture().await;
        let msg = f.api.seed_message(&f.chat, f.peer, "old");
        f.store.apply_status_update(msg.id, MessageStatus::Read).await;
        f.store
            .apply_incoming_message(Message {
                status: MessageStatus::Read,
                ..msg.clone()
            })
            .await;

        let history = f.store.load_history(f.chat.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MessageStatus::Read);
    }
}
