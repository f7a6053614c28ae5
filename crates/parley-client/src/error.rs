use thiserror::Error;

use parley_shared::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded {status}: {message}")]
    Server { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unknown chat: {0}")]
    UnknownChat(String),

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Live connection closed")]
    Closed,
}

impl ClientError {
    /// `true` for a 404 from the server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Server { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
