//! In-memory registry of live connections.
//!
//! Entries are keyed by [`ConnectionId`], so a user with two devices holds
//! two entries and closing one leaves the other in place. Every register and
//! unregister broadcasts the full `presence-changed` snapshot to all
//! registered connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use parley_shared::models::PresenceEntry;
use parley_shared::protocol::{PresenceChanged, ServerEvent};
use parley_shared::types::{ConnectionId, UserId};

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<ServerEvent>;

struct Entry {
    user_id: UserId,
    outbound: Outbound,
}

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: UserId,
    /// No connection of this user remains.
    pub went_offline: bool,
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    entries: Arc<RwLock<HashMap<ConnectionId, Entry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection_id` to `user_id`. Returns `false` when that exact pair
    /// was already registered. Other connections of the user are untouched.
    pub async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        outbound: Outbound,
    ) -> bool {
        let (added, snapshot, targets) = {
            let mut entries = self.entries.write().await;
            let added = match entries.get(&connection_id) {
                Some(existing) if existing.user_id == user_id => false,
                Some(existing) => {
                    warn!(
                        conn = %connection_id,
                        previous = %existing.user_id,
                        user = %user_id,
                        "Connection re-registered as a different user"
                    );
                    true
                }
                None => true,
            };
            if added {
                entries.insert(connection_id, Entry { user_id, outbound });
            }
            (added, snapshot_of(&entries), all_targets(&entries))
        };

        if added {
            info!(
                user = %user_id,
                conn = %connection_id,
                connections = snapshot.len(),
                "Presence registered"
            );
        }
        broadcast(targets, snapshot);
        added
    }

    /// Remove the entry for `connection_id`. Unknown ids are a no-op.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Unregistered> {
        let (removed, snapshot, targets) = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.remove(&connection_id) else {
                return None;
            };
            let went_offline = !entries.values().any(|e| e.user_id == entry.user_id);
            (
                Unregistered {
                    user_id: entry.user_id,
                    went_offline,
                },
                snapshot_of(&entries),
                all_targets(&entries),
            )
        };

        info!(
            user = %removed.user_id,
            conn = %connection_id,
            offline = removed.went_offline,
            "Presence unregistered"
        );
        broadcast(targets, snapshot);
        Some(removed)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| e.user_id == user_id)
    }

    pub async fn connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Relay targets of one user, snapshotted so callers send without the lock.
    pub async fn outbound_for(&self, user_id: UserId) -> Vec<(ConnectionId, Outbound)> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(id, e)| (*id, e.outbound.clone()))
            .collect()
    }

    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        snapshot_of(&*self.entries.read().await)
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn snapshot_of(entries: &HashMap<ConnectionId, Entry>) -> Vec<PresenceEntry> {
    entries
        .iter()
        .map(|(connection_id, e)| PresenceEntry {
            user_id: e.user_id,
            connection_id: *connection_id,
        })
        .collect()
}

fn all_targets(entries: &HashMap<ConnectionId, Entry>) -> Vec<(ConnectionId, Outbound)> {
    entries
        .iter()
        .map(|(id, e)| (*id, e.outbound.clone()))
        .collect()
}

fn broadcast(targets: Vec<(ConnectionId, Outbound)>, online_users: Vec<PresenceEntry>) {
    let event = ServerEvent::PresenceChanged(PresenceChanged { online_users });
    deliver(&targets, &event);
}

/// Push `event` to every target without waiting. Returns how many accepted it.
pub fn deliver(targets: &[(ConnectionId, Outbound)], event: &ServerEvent) -> usize {
    let mut delivered = 0;
    for (connection_id, outbound) in targets {
        match outbound.try_send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    conn = %connection_id,
                    event = event.name(),
                    "Dropping event for slow connection"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %connection_id, event = event.name(), "Connection already closed");
            }
        }
    }
    delivered
}
