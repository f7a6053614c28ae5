use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// The sender of a message is not one of the chat's two participants.
    #[error("User {0} is not a member of this chat")]
    NotAMember(String),

    /// A chat needs two distinct participants.
    #[error("A chat needs two distinct users")]
    SameUser,

    /// `SENDING` is client-local and never written.
    #[error("Status {0} cannot be persisted")]
    UnpersistableStatus(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    Poisoned,

    /// A blocking database task could not be joined.
    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
