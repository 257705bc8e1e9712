//! ==============================================================================
//! sensor-hub - environmental sensor hub
//! ==============================================================================
//!
//! purpose:
//!     sensor nodes post readings over http, the hub stores them in an
//!     append-only json record store and pushes each one live to every
//!     connected dashboard. dashboards also fetch the last 30 days on load.
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────┐  POST /api/sensor_data   ┌─────────────┐
//!     │ sensor node  │ ───────────────────────> │  ingest.rs  │
//!     └──────────────┘                          └──────┬──────┘
//!                                   append (durable)   │   then publish
//!                                  ┌───────────────────┴───────────┐
//!                                  ▼                               ▼
//!                           ┌─────────────┐                 ┌─────────────┐
//!                           │  store.rs   │                 │   hub.rs    │
//!                           └──────┬──────┘                 └──────┬──────┘
//!                                  │ read_all                      │ /ws
//!                           ┌──────┴──────┐                 ┌──────┴──────┐
//!                           │  query.rs   │ <── GET ─────── │  dashboard  │
//!                           └─────────────┘                 └─────────────┘
//! ```
//!
//! accounts (users.rs, session.rs) gate the dashboard page and, when
//! configured, the query api.
//!
//! ==============================================================================

pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod pages;
pub mod query;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod users;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

pub use config::HubConfig;
pub use state::AppState;

/// profile photos are the largest bodies we accept
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.storage.uploads_dir);
    let public = ServeDir::new(&state.config.server.public_dir);

    Router::new()
        .route("/", get(pages::index))
        .route("/signin", get(pages::signin))
        .route("/signup", get(pages::signup).post(routes::signup))
        .route("/login", post(routes::login))
        .route("/logout", get(routes::logout))
        .route("/dashboard", get(pages::dashboard))
        .route(
            "/api/sensor_data",
            get(routes::get_sensor_data).post(routes::post_sensor_data),
        )
        .route("/api/updateUser", post(routes::update_user))
        .route("/ws", get(routes::ws_handler))
        .nest_service("/uploads", uploads)
        .fallback_service(public)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// bind `config.server` and serve until ctrl+c / sigterm
pub async fn run(config: HubConfig) -> Result<()> {
    let state = AppState::new(config)?;
    let address = state.config.bind_address();
    let app = build_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("[STARTUP] Hub live at http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("[SHUTDOWN] Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
