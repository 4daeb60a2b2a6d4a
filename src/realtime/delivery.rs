//! Named seam between "something needs to reach a user" and the presence
//! registry internals. The notification pusher, message relay and reminder
//! sweep all resolve recipients through here; offline is `None`, never an
//! error, and callers fall back on the persisted record.

use std::sync::Arc;

use uuid::Uuid;

use super::presence::{EventSender, PresenceRegistry};

#[derive(Clone)]
pub struct Delivery {
    registry: Arc<PresenceRegistry>,
}

impl Delivery {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Active event channel for the user, if they are connected right now.
    pub fn resolve(&self, user_id: Uuid) -> Option<EventSender> {
        self.registry.sender_for(user_id)
    }
}
