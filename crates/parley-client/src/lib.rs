//! # parley-client
//!
//! Client-side synchronization for Parley. A [`SyncStore`] holds one
//! session's presence, notifications and message cache; [`spawn_session`]
//! keeps it fed from the server's live channel while user actions go
//! through the REST [`ChatApi`].

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use api::{ChatApi, Draft, HttpApi};
pub use config::ClientConfig;
pub use connection::{connect, open_session, run_subscription, spawn_session, LiveConnection};
pub use error::{ClientError, Result};
pub use events::StoreEvent;
pub use store::{OpenChatReport, SyncStore};

/// Install a `tracing` subscriber for embedders that have none.
/// Respects `RUST_LOG`. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
