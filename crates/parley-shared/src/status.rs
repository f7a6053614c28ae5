//! Delivery lifecycle of a message.
//!
//! Status only ever moves forward along `SENDING < SENT < DELIVERED < READ`.
//! [`MessageStatus::advance`] is the one place that decides whether a
//! requested status is applied; every caller (creation ack, live receipt,
//! reconciliation, read marking) goes through it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MessageStatus {
    /// Local to the author until the store acknowledges creation.
    Sending = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
}

/// Outcome of requesting a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// Backward, same-state or post-`READ` request. Not an error.
    Unchanged(MessageStatus),
}

impl Transition {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Transition::Advanced { .. })
    }

    /// Status after the transition was applied (or ignored).
    pub fn current(&self) -> MessageStatus {
        match *self {
            Transition::Advanced { to, .. } => to,
            Transition::Unchanged(status) => status,
        }
    }
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Sending,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
    ];

    pub fn advance(self, requested: MessageStatus) -> Transition {
        if requested > self {
            Transition::Advanced {
                from: self,
                to: requested,
            }
        } else {
            Transition::Unchanged(self)
        }
    }

    pub fn is_terminal(self) -> bool {
        self == MessageStatus::Read
    }

    /// Whether a store may hold this value. `SENDING` never leaves the author.
    pub fn is_persistable(self) -> bool {
        self != MessageStatus::Sending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownStatus(s.to_string()))
    }
}
