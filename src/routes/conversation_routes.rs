use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, ConversationRow, MessageKind, MessageRow, OkData, OkResponse,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{conversation_id}/messages", get(list_messages))
        .route("/conversations/{conversation_id}/messages", post(send_message))
        .route("/conversations/{conversation_id}/read", post(mark_read))
}

async fn ensure_participant(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<ConversationRow, ApiError> {
    let conv = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT conversation_id, participants, last_message, created_at, updated_at
        FROM conversation
        WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "conversation not found".into()))?;

    if !conv.participants.contains(&user_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Not a participant of this conversation".into(),
        ));
    }
    Ok(conv)
}

/* ============================================================
   POST /conversations  (get-or-create with another participant)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_id: Uuid,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ApiOk<ConversationRow>>, ApiError> {
    if req.participant_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "cannot open a conversation with yourself".into(),
        ));
    }

    let existing = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT conversation_id, participants, last_message, created_at, updated_at
        FROM conversation
        WHERE participants @> ARRAY[$1, $2]::uuid[]
        "#,
    )
    .bind(auth.user_id)
    .bind(req.participant_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    if let Some(conv) = existing {
        return Ok(Json(ApiOk { data: conv }));
    }

    let conv = sqlx::query_as::<_, ConversationRow>(
        r#"
        INSERT INTO conversation (participants)
        VALUES (ARRAY[$1, $2]::uuid[])
        RETURNING conversation_id, participants, last_message, created_at, updated_at
        "#,
    )
    .bind(auth.user_id)
    .bind(req.participant_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: conv }))
}

// GET /conversations : mine, most recently active first
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ConversationRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT conversation_id, participants, last_message, created_at, updated_at
        FROM conversation
        WHERE $1 = ANY(participants)
        ORDER BY updated_at DESC
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MessageRow>>>, ApiError> {
    ensure_participant(&state, conversation_id, auth.user_id).await?;

    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT message_id, conversation_id, sender_id, text, attachment_url, kind,
               read_by, created_at
        FROM message
        WHERE conversation_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   POST /conversations/{id}/messages
   HTTP send path: persists and updates the summary; live fan-out
   is the socket relay's job.
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub kind: Option<MessageKind>,
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ApiOk<MessageRow>>, ApiError> {
    ensure_participant(&state, conversation_id, auth.user_id).await?;

    let text = req.text.filter(|t| !t.is_empty());
    if text.is_none() && req.attachment_url.is_none() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "text or attachment_url is required".into(),
        ));
    }
    let kind = req.kind.unwrap_or(MessageKind::Text);
    let summary = match &text {
        Some(t) => t.clone(),
        None => kind.summary_label().to_string(),
    };

    let message = state
        .store
        .create_message(crate::store::NewMessage {
            conversation_id,
            sender_id: auth.user_id,
            text,
            attachment_url: req.attachment_url,
            kind,
        })
        .await?;
    state.store.touch_conversation(conversation_id, &summary).await?;

    Ok(Json(ApiOk { data: message }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_participant(&state, conversation_id, auth.user_id).await?;

    state
        .store
        .append_read_by(conversation_id, auth.user_id)
        .await?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
