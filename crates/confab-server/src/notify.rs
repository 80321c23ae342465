//! Notification sink: the outbound side of "emit a notification per
//! recipient".

use async_trait::async_trait;
use tracing::debug;

use confab_shared::{CoreError, CoreResult};
use confab_store::{NewNotification, Notification};

use crate::presence::PresenceRegistry;
use crate::protocol::ServerEvent;
use crate::store::Store;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, notification: NewNotification) -> CoreResult<()>;
}

/// Persists notifications and pushes them to the recipient's live
/// connection, if any.
pub struct StoreNotificationSink {
    store: Store,
    presence: PresenceRegistry,
}

impl StoreNotificationSink {
    pub fn new(store: Store, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn emit(&self, notification: NewNotification) -> CoreResult<()> {
        let stored: Notification = self.store.lock().await.insert_notification(&notification)?;

        // A missed push is not an error: the row is already durable.
        if let Some(handle) = self.presence.lookup(stored.recipient).await {
            let payload = serde_json::to_value(&stored)
                .map_err(|e| CoreError::Storage(e.to_string()))?;
            if let Err(e) = handle.push(ServerEvent::ReceiveNotification { payload }) {
                debug!(recipient = %stored.recipient.short(), error = %e, "notification push dropped");
            }
        }

        Ok(())
    }
}
