//! Live channel to the server.
//!
//! [`connect`] opens the WebSocket and splits it into a writer task fed by
//! an `mpsc` of [`ClientEvent`]s and a reader task producing parsed
//! [`ServerEvent`]s. [`run_subscription`] drains the latter into a
//! [`SyncStore`]; [`spawn_session`] keeps that running across reconnects.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use parley_shared::constants::DEFAULT_OUTBOUND_BUFFER;
use parley_shared::protocol::{ClientEvent, RegisterPresence, ServerEvent};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::store::SyncStore;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Both halves of an open live channel.
pub struct LiveConnection {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

pub async fn connect(config: &ClientConfig) -> Result<LiveConnection> {
    let url = config.ws_url();
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    debug!(%url, "Live channel connected");

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(DEFAULT_OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(DEFAULT_OUTBOUND_BUFFER);

    tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if write.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match ServerEvent::from_json(text.as_str()) {
                    Ok(event) => {
                        if in_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed server event"),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Live channel read failed");
                    break;
                }
            }
        }
    });

    Ok(LiveConnection {
        outbound: out_tx,
        inbound: in_rx,
    })
}

/// Connect, attach to `store` and announce presence.
pub async fn open_session(store: &SyncStore, config: &ClientConfig) -> Result<LiveConnection> {
    let connection = connect(config).await?;
    store.attach(connection.outbound.clone()).await;

    let register = ClientEvent::RegisterPresence(RegisterPresence {
        user_id: store.user_id(),
    });
    if connection.outbound.send(register).await.is_err() {
        store.detach().await;
        return Err(ClientError::Closed);
    }

    if let Err(e) = store.refresh_chats().await {
        warn!(error = %e, "Failed to load chats");
    }
    info!(user = %store.user_id(), "Session started");
    Ok(connection)
}

/// Apply every inbound event to `store` until the channel closes.
pub async fn run_subscription(store: SyncStore, mut inbound: mpsc::Receiver<ServerEvent>) {
    while let Some(event) = inbound.recv().await {
        debug!(event = event.name(), "Server event");
        store.dispatch(event).await;
    }
    store.detach().await;
}

/// Keep one live session running, reconnecting with exponential backoff.
pub fn spawn_session(store: SyncStore, config: ClientConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match open_session(&store, &config).await {
                Ok(connection) => {
                    backoff = INITIAL_BACKOFF;
                    run_subscription(store.clone(), connection.inbound).await;
                    info!(retry_in = ?backoff, "Live channel closed, reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Live channel connection failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_shared::models::{Notification, PresenceEntry};
    use parley_shared::protocol::{MessageDeleted, MessageRelay, PresenceChanged};
    use parley_shared::types::{ConnectionId, UserId};
    use parley_shared::MessageStatus;

    use super::*;
    use crate::events::StoreEvent;
    use crate::testing::FakeApi;

    #[tokio::test]
    async fn test_subscription_applies_events_in_order() {
        let (me, peer) = (UserId::new(), UserId::new());
        let (api, chat) = FakeApi::with_chat(me, peer);
        let api = Arc::new(api);
        let store = SyncStore::new(me, api.clone());
        let msg = api.seed_message(&chat, peer, "hello");

        let (tx, rx) = mpsc::channel(16);
        tx.send(ServerEvent::PresenceChanged(PresenceChanged {
            online_users: vec![PresenceEntry {
                user_id: peer,
                connection_id: ConnectionId::new(),
            }],
        }))
        .await
        .unwrap();
        tx.send(ServerEvent::MessageReceived(MessageRelay::from_message(&msg, me)))
            .await
            .unwrap();
        tx.send(ServerEvent::Notification(Notification::for_message(&msg)))
            .await
            .unwrap();
        drop(tx);

        let mut events = store.subscribe();
        run_subscription(store.clone(), rx).await;

        assert_eq!(store.unread_notifications().await.len(), 1);
        assert_eq!(api.stored_status(msg.id), Some(MessageStatus::Delivered));
        // Closing the channel clears presence.
        assert!(!store.is_online(peer).await);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(StoreEvent::PresenceChanged { online: vec![] }));
    }

    #[tokio::test]
    async fn test_deletion_event_reaches_cache() {
        let (me, peer) = (UserId::new(), UserId::new());
        let (api, chat) = FakeApi::with_chat(me, peer);
        let api = Arc::new(api);
        let store = SyncStore::new(me, api.clone());
        let msg = api.seed_message(&chat, peer, "gone soon");

        let (tx, rx) = mpsc::channel(16);
        tx.send(ServerEvent::MessageReceived(MessageRelay::from_message(&msg, me)))
            .await
            .unwrap();
        tx.send(ServerEvent::MessageDeleted(MessageDeleted {
            message_id: msg.id,
            chat_id: chat.id,
        }))
        .await
        .unwrap();
        drop(tx);

        run_subscription(store.clone(), rx).await;
        assert!(store.messages(chat.id).await.is_empty());
        assert!(store.unread_notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let config = ClientConfig::new("http://127.0.0.1:1");
        assert!(matches!(
            connect(&config).await,
            Err(ClientError::WebSocket(_))
        ));
    }

    #[tokio::test]
    async fn test_https_server_reaches_tls_handshake() {
        use tokio_tungstenite::tungstenite::error::{Error as WsError, UrlError};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and hang up before any handshake.
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let config = ClientConfig::new(format!("https://127.0.0.1:{port}"));
        assert!(config.ws_url().starts_with("wss://"));

        match connect(&config).await {
            Err(ClientError::WebSocket(WsError::Url(UrlError::TlsFeatureNotEnabled))) => {
                panic!("wss:// rejected without attempting TLS")
            }
            Err(_) => {}
            Ok(_) => panic!("handshake against a closed socket should fail"),
        }
    }
}
