use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, NotificationRow, OkData, OkResponse, ROLE_ADMIN},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_my_notifications))
        .route("/notifications/{notification_id}/read", post(mark_read))
        .route("/notifications/{notification_id}", delete(delete_notification))
}

// Newest first; this is the authoritative fallback path for anyone who was
// offline when the live push happened.
pub async fn list_my_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<NotificationRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT notification_id, user_id, kind, message, link, read, recurring, created_at
        FROM notification
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<NotificationRow>>, ApiError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        r#"
        UPDATE notification
        SET read = true
        WHERE notification_id = $1
          AND user_id = $2
        RETURNING notification_id, user_id, kind, message, link, read, recurring, created_at
        "#,
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "notification not found".into()))?;

    Ok(Json(ApiOk { data: row }))
}

// Admin cleanup only; the realtime layer itself never deletes notifications.
pub async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    if auth.role != ROLE_ADMIN {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admins can delete notifications".into(),
        ));
    }

    let res = sqlx::query(
        r#"
        DELETE FROM notification
        WHERE notification_id = $1
        "#,
    )
    .bind(notification_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "notification not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
