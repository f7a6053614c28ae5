//! # parley-store
//!
//! Durable storage for Parley chats and messages, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with typed CRUD
//! helpers and the async [`PersistenceGateway`] the live layer consumes.

pub mod chats;
pub mod database;
pub mod gateway;
pub mod messages;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use gateway::{PersistenceGateway, SqliteGateway};
