use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_shared::constants::WS_PATH;
use parley_shared::models::{
    Chat, Message, NewMessage, PresenceEntry, ReconciliationBatch, StatusReceipt,
};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::MessageStatus;
use parley_store::PersistenceGateway;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::reconcile::ReconciliationService;
use crate::router::EventRouter;
use crate::status::StatusService;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub presence: PresenceRegistry,
    pub router: EventRouter,
    pub status: StatusService,
    pub reconciler: ReconciliationService,
    /// Open WebSocket connections, registered or not.
    pub live_connections: Arc<AtomicUsize>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the live layer around one gateway.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: ServerConfig) -> Self {
        let presence = PresenceRegistry::new();
        let router = EventRouter::new(presence.clone());
        let status = StatusService::new(gateway.clone(), router.clone());
        let reconciler = ReconciliationService::new(gateway.clone(), status.clone());
        Self {
            gateway,
            presence,
            router,
            status,
            reconciler,
            live_connections: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);
    let cors = match state
        .config
        .cors_origin
        .as_deref()
        .map(HeaderValue::from_str)
    {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    };

    Router::new()
        .route("/health", get(health_check))
        .route(WS_PATH, get(ws::ws_handler))
        .route("/api/chats", post(create_chat))
        .route("/api/chats/user/{user_id}", get(chats_for_user))
        .route("/api/messages", post(create_message))
        .route("/api/messages/status", patch(update_status))
        // Same segment: a chat id for GET, a message id for DELETE.
        .route(
            "/api/messages/{id}",
            get(messages_for_chat).delete(delete_message),
        )
        .route("/api/sessions/{user_id}/reconcile", post(reconcile))
        .route("/api/presence", get(online_users))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    user1_id: UserId,
    user2_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    message_id: MessageId,
    new_status: MessageStatus,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.presence.connection_count().await,
    })
}

async fn create_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ServerError> {
    let (chat, created) = state
        .gateway
        .find_or_create_chat(req.user1_id, req.user2_id)
        .await?;
    if created {
        info!(chat = %chat.id, "Chat created");
        Ok((StatusCode::CREATED, Json(chat)))
    } else {
        Ok((StatusCode::OK, Json(chat)))
    }
}

async fn chats_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Chat>>, ServerError> {
    Ok(Json(state.gateway.chats_for_user(user_id).await?))
}

async fn create_message(
    State(state): State<AppState>,
    Json(new): Json<NewMessage>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    if new.content.trim().is_empty() {
        return Err(ServerError::BadRequest("Message content is empty".into()));
    }
    let message = state.gateway.create_message(new).await?;
    info!(msg = %message.id, chat = %message.chat_id, sender = %message.sender_id, "Message stored");
    Ok((StatusCode::CREATED, Json(message)))
}

async fn messages_for_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    state.gateway.get_chat(chat_id).await?;
    Ok(Json(state.gateway.messages_for_chat(chat_id).await?))
}

async fn update_status(
    State(state): State<AppState>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusReceipt>, ServerError> {
    let (transition, message) = state.status.promote(req.message_id, req.new_status).await?;
    Ok(Json(StatusReceipt {
        message_id: message.id,
        status: message.status,
        advanced: transition.is_advanced(),
    }))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<Message>, ServerError> {
    let message = state.gateway.delete_message(id).await?;
    info!(msg = %id, chat = %message.chat_id, "Message deleted");
    Ok(Json(message))
}

async fn reconcile(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<ReconciliationBatch>, ServerError> {
    Ok(Json(state.reconciler.run(user_id).await?))
}

async fn online_users(State(state): State<AppState>) -> Json<Vec<PresenceEntry>> {
    Json(state.presence.online_users().await)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
