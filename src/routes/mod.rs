use crate::models::AppState;
use crate::realtime;
use axum::{routing::get, Router};

pub mod auth_routes;
pub mod call_routes;
pub mod conversation_routes;
pub mod form_routes;
pub mod home_routes;
pub mod notification_routes;
pub mod stats_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", notification_routes::router())
        .nest("/api/v1", conversation_routes::router())
        .nest("/api/v1", form_routes::router())
        .nest("/api/v1", call_routes::router())
        .nest("/api/v1", stats_routes::router())
        .route("/ws", get(realtime::socket::ws_handler))
        .merge(home_routes::router())
        .with_state(state)
}
