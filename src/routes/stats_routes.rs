use std::collections::HashSet;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/stats/doctors", get(doctor_stats))
}

#[derive(Debug, Serialize)]
pub struct DoctorStats {
    pub total_doctors: i64,
    pub online_doctors: usize,
    pub online_doctor_ids: Vec<Uuid>,
}

pub async fn doctor_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<DoctorStats>>, ApiError> {
    let doctor_ids = state.store.doctor_ids().await?;
    let total_doctors = doctor_ids.len() as i64;

    let doctor_set: HashSet<Uuid> = doctor_ids.into_iter().collect();
    let online_doctor_ids = state
        .presence
        .online_matching(|user_id, _| doctor_set.contains(user_id));

    Ok(Json(ApiOk {
        data: DoctorStats {
            total_doctors,
            online_doctors: online_doctor_ids.len(),
            online_doctor_ids,
        },
    }))
}
