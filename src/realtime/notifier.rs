//! Notification pusher: durable persistence first, then best-effort live
//! delivery. Used as a side effect by the form/appointment workflows and by
//! the reminder sweep.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::{NotificationKind, NotificationRow};
use crate::store::{Store, StoreError};

use super::delivery::Delivery;
use super::events::ServerEvent;

pub struct Notifier {
    store: Arc<dyn Store>,
    delivery: Delivery,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, delivery: Delivery) -> Self {
        Self { store, delivery }
    }

    /// Persist a notification and attempt to push it to the recipient's live
    /// session. Persistence failure propagates to the caller; delivery is
    /// fire-and-forget and never fails past this function. The persisted row
    /// is returned regardless of delivery outcome.
    pub async fn push(
        &self,
        recipient_id: Uuid,
        kind: NotificationKind,
        message: &str,
        link: &str,
        recurring: bool,
    ) -> Result<NotificationRow, StoreError> {
        let row = self
            .store
            .create_notification(recipient_id, kind, message, link, recurring)
            .await?;

        // Re-resolve after the awaited insert: presence may have changed
        // while the write was pending.
        match self.delivery.resolve(recipient_id) {
            Some(tx) => {
                if tx.send(ServerEvent::NotificationNew(row.clone())).is_err() {
                    tracing::debug!(%recipient_id, "notification push skipped, connection gone");
                }
            }
            None => {
                tracing::debug!(%recipient_id, "notification push skipped, recipient offline");
            }
        }

        Ok(row)
    }
}
