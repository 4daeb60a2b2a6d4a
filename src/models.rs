use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::realtime::notifier::Notifier;
use crate::realtime::presence::PresenceRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub store: Arc<dyn Store>,
    pub presence: Arc<PresenceRegistry>,
    pub notifier: Arc<Notifier>,
    pub session_ttl_hours: i64,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

/// Compact sender summary attached to outbound message events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBrief {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: String,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum NotificationKind {
    Form = 0,
    Appointment = 1,
    Reminder = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub link: String,
    pub read: bool,
    pub recurring: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MessageKind {
    Text = 0,
    Image = 1,
    File = 2,
    Audio = 3,
    Video = 4,
    Voice = 5,
    AudioCall = 6,
    VideoCall = 7,
    MissedCall = 8,
}

impl MessageKind {
    /// Display label used for the conversation summary when a message
    /// carries no text (attachment or call record).
    pub fn summary_label(self) -> &'static str {
        match self {
            MessageKind::Text => "Message",
            MessageKind::Image => "Image",
            MessageKind::File => "File",
            MessageKind::Audio => "Audio message",
            MessageKind::Video => "Video message",
            MessageKind::Voice => "Voice message",
            MessageKind::AudioCall => "Audio call",
            MessageKind::VideoCall => "Video call",
            MessageKind::MissedCall => "Missed call",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub kind: MessageKind,
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationRow {
    pub conversation_id: Uuid,
    pub participants: Vec<Uuid>,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormRow {
    pub form_id: Uuid,
    pub marketer_id: Uuid,
    pub assigned_doctor_id: Option<Uuid>,
    pub client_name: String,
    pub sex: String,
    pub age: i32,
    pub details: String,
    pub preferred_date: DateTime<Utc>,
    pub preferred_time: String,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

// Form status (smallint): 0 pending, 1 accepted, 2 rejected
pub const FORM_STATUS_PENDING: i16 = 0;
pub const FORM_STATUS_ACCEPTED: i16 = 1;
pub const FORM_STATUS_REJECTED: i16 = 2;

// Roles (app_user.roles): 0 marketer, 1 admin, 2 doctor
pub const ROLE_MARKETER: i16 = 0;
pub const ROLE_ADMIN: i16 = 1;
pub const ROLE_DOCTOR: i16 = 2;

pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "marketer",
        1 => "admin",
        2 => "doctor",
        _ => "unknown",
    }
    .to_string()
}
