use thiserror::Error;

/// Errors raised while decoding live events.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message status: {0}")]
    UnknownStatus(String),

    #[error("Event too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}
