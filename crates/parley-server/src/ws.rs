//! Live connection handling.
//!
//! Each socket gets one inbound loop (this task) and one writer task that
//! drains the connection's bounded outbound queue. Frames are JSON
//! [`ClientEvent`]s; anything that fails to parse is logged and dropped
//! without closing the connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use parley_shared::protocol::{ClientEvent, MessageRelay, ServerEvent};
use parley_shared::types::{ConnectionId, UserId};
use parley_store::StoreError;

use crate::api::AppState;
use crate::error::ServerError;
use crate::presence::Outbound;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.config.max_connections;
    let Some(slot) = ConnectionSlot::acquire(&state.live_connections, max) else {
        warn!(max, "Rejecting WebSocket upgrade, connection limit reached");
        return ServerError::Overloaded(max).into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, slot))
}

/// Counts one open socket for as long as it lives.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    /// `max == 0` means unlimited.
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if max > 0 && previous >= max {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-connection state owned by the inbound loop.
pub(crate) struct Session {
    pub connection_id: ConnectionId,
    /// Set by `register-presence`.
    pub user_id: Option<UserId>,
    pub outbound: Outbound,
}

impl Session {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id: None,
            outbound,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, _slot: ConnectionSlot) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);
    let mut session = Session::new(tx);
    let connection_id = session.connection_id;
    debug!(conn = %connection_id, "WebSocket opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn = %connection_id, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_frame(&state, &mut session, text.as_str()).await,
            Ok(WsMessage::Close(_)) => break,
            // Binary frames are not part of the protocol; pings are answered by the transport.
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %connection_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    state.presence.unregister(connection_id).await;
    drop(session);
    writer.abort();
    debug!(conn = %connection_id, "WebSocket closed");
}

/// Dispatch one inbound text frame.
pub(crate) async fn handle_frame(state: &AppState, session: &mut Session, text: &str) {
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn = %session.connection_id, error = %e, "Dropping malformed event");
            return;
        }
    };

    if let ClientEvent::RegisterPresence(register) = &event {
        register_presence(state, session, register.user_id).await;
        return;
    }

    let Some(user_id) = session.user_id else {
        warn!(conn = %session.connection_id, event = event.name(), "Event before register-presence, dropped");
        return;
    };

    match event {
        ClientEvent::SendMessage(relay) => relay_message(state, user_id, relay).await,
        ClientEvent::StatusChanged(change) => {
            state
                .router
                .route_status_update(change.message_id, change.new_status, change.recipient_id)
                .await;
        }
        ClientEvent::MessageDeleted(notice) => {
            state
                .router
                .route_deletion(notice.message_id, notice.chat_id, notice.recipient_id)
                .await;
        }
        ClientEvent::RegisterPresence(_) => {}
    }
}

async fn register_presence(state: &AppState, session: &mut Session, user_id: UserId) {
    session.user_id = Some(user_id);
    state
        .presence
        .register(user_id, session.connection_id, session.outbound.clone())
        .await;

    match state.reconciler.run(user_id).await {
        Ok(batch) if batch.is_empty() => {}
        Ok(batch) => {
            let count = batch.messages.len();
            if session.outbound.send(ServerEvent::Backlog(batch)).await.is_err() {
                debug!(conn = %session.connection_id, "Connection closed before backlog was queued");
            } else {
                info!(user = %user_id, conn = %session.connection_id, count, "Backlog pushed");
            }
        }
        Err(e) => {
            error!(user = %user_id, error = %e, "Reconciliation failed");
        }
    }
}

/// Relay a message the sender already stored. The stored row is what gets
/// forwarded, addressed to the other member of its chat.
async fn relay_message(state: &AppState, user_id: UserId, relay: MessageRelay) {
    if relay.sender_id != user_id {
        warn!(user = %user_id, claimed = %relay.sender_id, "send-message for another sender, dropped");
        return;
    }

    let lookup = async {
        let message = state.gateway.get_message(relay.message_id).await?;
        let chat = state.gateway.get_chat(message.chat_id).await?;
        Ok::<_, StoreError>((message, chat))
    };
    let (message, chat) = match lookup.await {
        Ok(found) => found,
        Err(StoreError::NotFound) => {
            warn!(msg = %relay.message_id, "send-message for unknown message, dropped");
            return;
        }
        Err(e) => {
            error!(msg = %relay.message_id, error = %e, "Failed to load message for relay");
            return;
        }
    };

    if message.sender_id != user_id {
        warn!(user = %user_id, msg = %message.id, "send-message for a message authored by someone else, dropped");
        return;
    }
    let Some(recipient) = chat.peer_of(user_id) else {
        warn!(user = %user_id, chat = %chat.id, "Sender is not a chat member, dropped");
        return;
    };
    if recipient != relay.recipient_id {
        debug!(claimed = %relay.recipient_id, %recipient, "Relay addressed to chat peer instead");
    }

    state.router.route_message(&message, recipient).await;
}
