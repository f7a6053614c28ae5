//! # parley-server
//!
//! Live delivery server for Parley chats.
//!
//! This binary provides:
//! - **Presence registry** of every open WebSocket, keyed per connection so
//!   one user may be online from several devices
//! - **Event relay** of persisted messages, status changes and deletions to
//!   whichever connections the other participant has open
//! - **Reconciliation** of messages that arrived while a user was offline,
//!   run whenever they register presence
//! - **REST API** (axum) for chats, messages and status promotion

mod api;
mod config;
mod error;
mod presence;
mod reconcile;
mod router;
mod status;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_shared::constants::APP_NAME;
use parley_store::{Database, SqliteGateway};

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Database::open_at(path)?
        }
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");

    let gateway = Arc::new(SqliteGateway::new(db));
    let http_addr = config.http_addr;
    let app_state = AppState::new(gateway, config);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
