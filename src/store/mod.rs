//! Collection-store seam for the realtime layer.
//!
//! The presence/messaging/notification core never touches SQL directly; it
//! goes through this trait so the delivery logic can be exercised against an
//! in-memory store in tests. Production wires in [`pg::PgStore`].

pub mod pg;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{MessageKind, MessageRow, NotificationKind, NotificationRow, UserBrief};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub kind: MessageKind,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a notification with `read = false`.
    async fn create_notification(
        &self,
        recipient_id: Uuid,
        kind: NotificationKind,
        message: &str,
        link: &str,
        recurring: bool,
    ) -> Result<NotificationRow, StoreError>;

    /// Whether the user already has an unread reminder notification
    /// (reminder-sweep dedup check).
    async fn has_unread_reminder(&self, user_id: Uuid) -> Result<bool, StoreError>;

    /// Persist a message with `read_by = [sender_id]`.
    async fn create_message(&self, new: NewMessage) -> Result<MessageRow, StoreError>;

    /// Append `reader_id` to `read_by` of every message in the conversation
    /// not already containing it. Idempotent; returns rows changed.
    async fn append_read_by(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Overwrite the conversation's denormalized summary and bump `updated_at`.
    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        summary: &str,
    ) -> Result<(), StoreError>;

    async fn conversation_participants(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Count of forms still in the unclaimed (pending) state.
    async fn pending_form_count(&self) -> Result<i64, StoreError>;

    /// All active users holding the doctor role.
    async fn doctor_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn user_brief(&self, user_id: Uuid) -> Result<Option<UserBrief>, StoreError>;
}
