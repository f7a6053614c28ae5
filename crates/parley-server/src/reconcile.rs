//! Catch-up pass run when a user starts a session.
//!
//! Every message addressed to the user that is still below `DELIVERED` is
//! promoted through the [`StatusService`] and turned into an unread
//! notification. Running it twice selects nothing the second time.

use std::sync::Arc;

use tracing::{info, warn};

use parley_shared::models::{Notification, ReconciliationBatch};
use parley_shared::types::UserId;
use parley_shared::MessageStatus;
use parley_store::{PersistenceGateway, Result};

use crate::status::StatusService;

#[derive(Clone)]
pub struct ReconciliationService {
    gateway: Arc<dyn PersistenceGateway>,
    status: StatusService,
}

impl ReconciliationService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, status: StatusService) -> Self {
        Self { gateway, status }
    }

    /// Promote the user's undelivered inbound messages and return what moved.
    ///
    /// Listing failures abort the pass. A single failed promotion is logged
    /// and skipped: the message stays below `DELIVERED` and the next pass
    /// picks it up again.
    pub async fn run(&self, user_id: UserId) -> Result<ReconciliationBatch> {
        let mut batch = ReconciliationBatch::default();

        for chat in self.gateway.chats_for_user(user_id).await? {
            let pending = self
                .gateway
                .messages_for_chat(chat.id)
                .await?
                .into_iter()
                .filter(|m| m.sender_id != user_id && m.status < MessageStatus::Delivered);

            for message in pending {
                match self.status.promote(message.id, MessageStatus::Delivered).await {
                    Ok((transition, promoted)) if transition.is_advanced() => {
                        batch.notifications.push(Notification::for_message(&promoted));
                        batch.messages.push(promoted);
                    }
                    // Someone else advanced it first.
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user = %user_id, msg = %message.id, error = %e, "Reconciliation promotion failed");
                    }
                }
            }
        }

        if !batch.is_empty() {
            info!(user = %user_id, promoted = batch.messages.len(), "Reconciled pending messages");
        }
        Ok(batch)
    }
}
