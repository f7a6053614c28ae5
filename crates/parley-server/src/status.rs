use std::sync::Arc;

use tracing::{debug, info};

use parley_shared::models::Message;
use parley_shared::types::MessageId;
use parley_shared::{MessageStatus, Transition};
use parley_store::{PersistenceGateway, Result};

use crate::router::EventRouter;

/// Durable status promotion followed by a relay to the message's sender.
#[derive(Clone)]
pub struct StatusService {
    gateway: Arc<dyn PersistenceGateway>,
    router: EventRouter,
}

impl StatusService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, router: EventRouter) -> Self {
        Self { gateway, router }
    }

    /// Advance `message_id` towards `requested`. The sender only hears about
    /// it when the stored status actually moved. A failed relay leaves the
    /// write in place.
    pub async fn promote(
        &self,
        message_id: MessageId,
        requested: MessageStatus,
    ) -> Result<(Transition, Message)> {
        let (transition, message) = self.gateway.update_status(message_id, requested).await?;

        match transition {
            Transition::Advanced { from, to } => {
                let reached = self
                    .router
                    .route_status_update(message_id, to, message.sender_id)
                    .await;
                info!(msg = %message_id, %from, %to, reached, "Status advanced");
            }
            Transition::Unchanged(current) => {
                debug!(msg = %message_id, %requested, %current, "Status request ignored");
            }
        }

        Ok((transition, message))
    }
}
