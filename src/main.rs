mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod realtime;
mod routes;
mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::{config::Config, models::AppState};
use crate::realtime::{delivery::Delivery, notifier::Notifier, presence::PresenceRegistry,
    reminder::ReminderSweep};
use crate::store::{pg::PgStore, Store};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let presence = Arc::new(PresenceRegistry::new());
    let delivery = Delivery::new(presence.clone());
    let notifier = Arc::new(Notifier::new(store.clone(), delivery.clone()));

    // Background reminder sweep for unclaimed forms.
    let sweep = Arc::new(ReminderSweep::new(
        store.clone(),
        notifier.clone(),
        delivery,
    ));
    tokio::spawn(sweep.run(Duration::from_secs(cfg.reminder_interval_secs)));

    let state = AppState {
        db: pool,
        store,
        presence,
        notifier,
        session_ttl_hours: cfg.session_ttl_hours,
    };

    // Allow browser clients to call the API and open the socket.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
