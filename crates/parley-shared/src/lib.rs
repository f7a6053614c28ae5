//! # parley-shared
//!
//! Types shared by every Parley crate: identifiers, domain models, the
//! message status state machine and the live event protocol.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod status;
pub mod types;

pub use error::ProtocolError;
pub use status::{MessageStatus, Transition};
