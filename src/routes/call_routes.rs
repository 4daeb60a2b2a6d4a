use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/calls/peer", post(save_peer_id))
        .route("/calls/peer/{user_id}", get(get_peer_id))
}

#[derive(Debug, Deserialize)]
pub struct SavePeerRequest {
    pub peer_id: String,
}

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub user_id: Uuid,
    pub peer_id: String,
}

// Registers the caller's call-signaling address in the presence registry.
pub async fn save_peer_id(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SavePeerRequest>,
) -> Result<Json<ApiOk<PeerInfo>>, ApiError> {
    let peer_id = req.peer_id.trim().to_string();
    if peer_id.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "peer_id is required".into(),
        ));
    }

    state.presence.set_peer_id(auth.user_id, peer_id.clone());

    Ok(Json(ApiOk {
        data: PeerInfo {
            user_id: auth.user_id,
            peer_id,
        },
    }))
}

// Peer discovery for outbound calls; 404 when the target is offline or has
// not registered a peer id.
pub async fn get_peer_id(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<PeerInfo>>, ApiError> {
    let Some(peer_id) = state.presence.get_peer_id(user_id) else {
        let msg = if state.presence.get_session(user_id).is_none() {
            "User is offline"
        } else {
            "User has not registered a peer id"
        };
        return Err(ApiError::NotFound("NOT_FOUND", msg.into()));
    };

    Ok(Json(ApiOk {
        data: PeerInfo { user_id, peer_id },
    }))
}
