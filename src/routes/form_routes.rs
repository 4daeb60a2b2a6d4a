use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, FormRow, NotificationKind, ROLE_DOCTOR, ROLE_MARKETER,
        FORM_STATUS_ACCEPTED, FORM_STATUS_PENDING, FORM_STATUS_REJECTED,
    },
};

fn is_marketer(auth: &AuthContext) -> bool { auth.role == ROLE_MARKETER }
fn is_doctor(auth: &AuthContext) -> bool { auth.role == ROLE_DOCTOR }

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forms", post(submit_form))
        .route("/forms/open", get(list_open_forms))
        .route("/forms/mine", get(list_my_forms))
        .route("/forms/{form_id}", get(get_form))
        .route("/forms/{form_id}/accept", post(accept_form))
        .route("/forms/{form_id}/reject", post(reject_form))
}

const FORM_SELECT: &str = r#"
    SELECT form_id, marketer_id, assigned_doctor_id, client_name, sex, age, details,
           preferred_date, preferred_time, status, created_at, updated_at
    FROM form
"#;

/* ============================================================
   POST /forms  (marketer submits; every doctor gets notified)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SubmitFormRequest {
    pub client_name: String,
    pub sex: String,
    pub age: i32,
    pub details: String,
    pub preferred_date: DateTime<Utc>,
    pub preferred_time: String,
}

pub async fn submit_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SubmitFormRequest>,
) -> Result<Json<ApiOk<FormRow>>, ApiError> {
    if !is_marketer(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only marketers can submit forms".into(),
        ));
    }

    if req.client_name.trim().is_empty() || req.details.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "client_name and details are required".into(),
        ));
    }

    let form = sqlx::query_as::<_, FormRow>(
        r#"
        INSERT INTO form (marketer_id, client_name, sex, age, details,
                          preferred_date, preferred_time, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING form_id, marketer_id, assigned_doctor_id, client_name, sex, age, details,
                  preferred_date, preferred_time, status, created_at, updated_at
        "#,
    )
    .bind(auth.user_id)
    .bind(req.client_name.trim())
    .bind(req.sex.trim())
    .bind(req.age)
    .bind(req.details.trim())
    .bind(req.preferred_date)
    .bind(req.preferred_time.trim())
    .bind(FORM_STATUS_PENDING)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    // Notify all doctors. Push failure is non-fatal to the submission.
    let link = format!("/forms/{}", form.form_id);
    match state.store.doctor_ids().await {
        Ok(doctors) => {
            for doctor_id in doctors {
                if let Err(e) = state
                    .notifier
                    .push(
                        doctor_id,
                        NotificationKind::Form,
                        "New form available. Click to review.",
                        &link,
                        false,
                    )
                    .await
                {
                    tracing::error!(%doctor_id, "form notification failed: {e}");
                }
            }
        }
        Err(e) => tracing::error!("doctor lookup for form notification failed: {e}"),
    }

    Ok(Json(ApiOk { data: form }))
}

// GET /forms/open : doctors fetch unclaimed forms
pub async fn list_open_forms(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<FormRow>>>, ApiError> {
    if !is_doctor(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctors can view open forms".into(),
        ));
    }

    let sql = format!("{FORM_SELECT} WHERE status = $1 ORDER BY created_at DESC");
    let rows = sqlx::query_as::<_, FormRow>(&sql)
        .bind(FORM_STATUS_PENDING)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

// GET /forms/mine : doctor sees assigned forms, marketer sees submitted ones
pub async fn list_my_forms(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<FormRow>>>, ApiError> {
    let sql = if is_doctor(&auth) {
        format!("{FORM_SELECT} WHERE assigned_doctor_id = $1 ORDER BY created_at DESC")
    } else {
        format!("{FORM_SELECT} WHERE marketer_id = $1 ORDER BY created_at DESC")
    };
    let rows = sqlx::query_as::<_, FormRow>(&sql)
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_form(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(form_id): Path<Uuid>,
) -> Result<Json<ApiOk<FormRow>>, ApiError> {
    let sql = format!("{FORM_SELECT} WHERE form_id = $1");
    let form = sqlx::query_as::<_, FormRow>(&sql)
        .bind(form_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "form not found".into()))?;

    Ok(Json(ApiOk { data: form }))
}

/* ============================================================
   POST /forms/{id}/accept  (doctor claims a pending form)
   ============================================================ */

pub async fn accept_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(form_id): Path<Uuid>,
) -> Result<Json<ApiOk<FormRow>>, ApiError> {
    if !is_doctor(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctors can accept forms".into(),
        ));
    }

    // Claim only if still pending; a second accept loses the race.
    let form = sqlx::query_as::<_, FormRow>(
        r#"
        UPDATE form
        SET status = $3,
            assigned_doctor_id = $2,
            updated_at = now()
        WHERE form_id = $1
          AND status = $4
        RETURNING form_id, marketer_id, assigned_doctor_id, client_name, sex, age, details,
                  preferred_date, preferred_time, status, created_at, updated_at
        "#,
    )
    .bind(form_id)
    .bind(auth.user_id)
    .bind(FORM_STATUS_ACCEPTED)
    .bind(FORM_STATUS_PENDING)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::BadRequest("FORM_ALREADY_HANDLED", "Form already handled".into()))?;

    let link = format!("/forms/{}", form.form_id);

    // Notify doctor and marketer; failures are logged, not surfaced.
    if let Err(e) = state
        .notifier
        .push(
            auth.user_id,
            NotificationKind::Appointment,
            "You accepted a form. Appointment created.",
            &link,
            false,
        )
        .await
    {
        tracing::error!("accept notification (doctor) failed: {e}");
    }
    if let Err(e) = state
        .notifier
        .push(
            form.marketer_id,
            NotificationKind::Appointment,
            "A doctor accepted your form. Appointment created.",
            &link,
            false,
        )
        .await
    {
        tracing::error!("accept notification (marketer) failed: {e}");
    }

    Ok(Json(ApiOk { data: form }))
}

// POST /forms/{id}/reject : doctor declines a pending form; the marketer is told.
pub async fn reject_form(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(form_id): Path<Uuid>,
) -> Result<Json<ApiOk<FormRow>>, ApiError> {
    if !is_doctor(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctors can reject forms".into(),
        ));
    }

    let form = sqlx::query_as::<_, FormRow>(
        r#"
        UPDATE form
        SET status = $2,
            updated_at = now()
        WHERE form_id = $1
          AND status = $3
        RETURNING form_id, marketer_id, assigned_doctor_id, client_name, sex, age, details,
                  preferred_date, preferred_time, status, created_at, updated_at
        "#,
    )
    .bind(form_id)
    .bind(FORM_STATUS_REJECTED)
    .bind(FORM_STATUS_PENDING)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::BadRequest("FORM_ALREADY_HANDLED", "Form already handled".into()))?;

    if let Err(e) = state
        .notifier
        .push(
            form.marketer_id,
            NotificationKind::Form,
            "A doctor rejected your form.",
            &format!("/forms/{}", form.form_id),
            false,
        )
        .await
    {
        tracing::error!("reject notification (marketer) failed: {e}");
    }

    Ok(Json(ApiOk { data: form }))
}
