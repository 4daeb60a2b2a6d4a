//! Periodic reminder sweep for unclaimed forms.
//!
//! Runs independently of any request: every tick scans for pending forms
//! and nudges doctors. The persisted reminder is deduplicated (at most one
//! unread reminder per doctor while the backlog stands); the live
//! `reminder:ping` carries only a count and is sent on every tick to online
//! doctors regardless of the dedup outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::NotificationKind;
use crate::store::Store;

use super::delivery::Delivery;
use super::events::ServerEvent;
use super::notifier::Notifier;

const REMINDER_MESSAGE: &str = "Reminder: a client form is still unclaimed";
const REMINDER_LINK: &str = "/forms";

pub struct ReminderSweep {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    delivery: Delivery,
    sweep_in_progress: AtomicBool,
}

impl ReminderSweep {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>, delivery: Delivery) -> Self {
        Self {
            store,
            notifier,
            delivery,
            sweep_in_progress: AtomicBool::new(false),
        }
    }

    /// Tick loop. Spawn once at startup; the interval is a tunable, not a
    /// contract.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_once().await {
                tracing::error!("reminder sweep error: {e}");
            }
        }
    }

    /// One sweep. Re-entrancy guarded: a tick arriving while a sweep is
    /// still running is skipped rather than double-counted.
    pub async fn sweep_once(&self) -> Result<(), crate::store::StoreError> {
        if self
            .sweep_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reminder sweep still running, tick skipped");
            return Ok(());
        }
        let result = self.sweep_inner().await;
        self.sweep_in_progress.store(false, Ordering::Release);
        result
    }

    async fn sweep_inner(&self) -> Result<(), crate::store::StoreError> {
        let pending = self.store.pending_form_count().await?;
        if pending == 0 {
            return Ok(());
        }

        let doctors = self.store.doctor_ids().await?;
        for doctor_id in &doctors {
            match self.store.has_unread_reminder(*doctor_id).await {
                Ok(true) => {} // an open reminder already exists, skip
                Ok(false) => {
                    if let Err(e) = self
                        .notifier
                        .push(
                            *doctor_id,
                            NotificationKind::Reminder,
                            REMINDER_MESSAGE,
                            REMINDER_LINK,
                            true,
                        )
                        .await
                    {
                        tracing::error!(%doctor_id, "reminder push failed: {e}");
                    }
                }
                Err(e) => {
                    tracing::error!(%doctor_id, "reminder dedup check failed: {e}");
                }
            }
        }

        // Live nudge with the backlog size, independent of the persisted
        // dedup above.
        for doctor_id in &doctors {
            if let Some(tx) = self.delivery.resolve(*doctor_id) {
                let _ = tx.send(ServerEvent::ReminderPing { pending });
            }
        }

        Ok(())
    }
}
