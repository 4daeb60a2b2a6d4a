use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    MessageRow, NotificationKind, NotificationRow, UserBrief, ROLE_DOCTOR, FORM_STATUS_PENDING,
    role_to_string,
};

use super::{NewMessage, Store, StoreError};

/// Postgres-backed store used in production.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_notification(
        &self,
        recipient_id: Uuid,
        kind: NotificationKind,
        message: &str,
        link: &str,
        recurring: bool,
    ) -> Result<NotificationRow, StoreError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notification (user_id, kind, message, link, read, recurring)
            VALUES ($1, $2, $3, $4, false, $5)
            RETURNING notification_id, user_id, kind, message, link, read, recurring, created_at
            "#,
        )
        .bind(recipient_id)
        .bind(kind)
        .bind(message)
        .bind(link)
        .bind(recurring)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn has_unread_reminder(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notification
            WHERE user_id = $1
              AND kind = $2
              AND read = false
            "#,
        )
        .bind(user_id)
        .bind(NotificationKind::Reminder)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn create_message(&self, new: NewMessage) -> Result<MessageRow, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO message (conversation_id, sender_id, text, attachment_url, kind, read_by)
            VALUES ($1, $2, $3, $4, $5, ARRAY[$2]::uuid[])
            RETURNING message_id, conversation_id, sender_id, text, attachment_url, kind,
                      read_by, created_at
            "#,
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.text)
        .bind(new.attachment_url)
        .bind(new.kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn append_read_by(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE message
            SET read_by = array_append(read_by, $2)
            WHERE conversation_id = $1
              AND NOT (read_by @> ARRAY[$2]::uuid[])
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        summary: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE conversation
            SET last_message = $2,
                updated_at = now()
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(summary)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn conversation_participants(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let participants: Option<Vec<Uuid>> = sqlx::query_scalar(
            r#"
            SELECT participants
            FROM conversation
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        participants.ok_or(StoreError::NotFound("conversation"))
    }

    async fn pending_form_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM form
            WHERE status = $1
            "#,
        )
        .bind(FORM_STATUS_PENDING)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn doctor_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM app_user
            WHERE roles = $1
              AND is_active = true
            "#,
        )
        .bind(ROLE_DOCTOR)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn user_brief(&self, user_id: Uuid) -> Result<Option<UserBrief>, StoreError> {
        let row: Option<(Uuid, String, i16)> = sqlx::query_as(
            r#"
            SELECT user_id, display_name, roles
            FROM app_user
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, display_name, roles)| UserBrief {
            user_id,
            display_name,
            role: role_to_string(roles),
        }))
    }
}
