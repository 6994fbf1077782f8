pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use nphies_core::config::Config;
use nphies_core::Poller;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Poll
        .route("/api/poll/trigger", post(routes::poll::trigger_poll))
        .route("/api/poll/cancel", post(routes::poll::cancel_poll))
        .route("/api/poll/stats", get(routes::poll::get_stats))
        .route("/api/poll/logs", get(routes::poll::list_logs))
        .route("/api/poll/logs/{id}", get(routes::poll::get_log))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the poll server for the project at `root`, with the scheduler
/// running when `schedule.interval_secs` is set.
pub async fn serve(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    let port = port.unwrap_or(config.server.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(root, &config, listener).await
}

/// Start the server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(
    root: &Path,
    config: &Config,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let poller = Arc::new(Poller::from_config(root, config)?);
    if let Some(interval) = config.schedule.interval() {
        scheduler::spawn(Arc::clone(&poller), interval);
    }
    let app = build_router(state::AppState::new(poller));

    let actual_port = listener.local_addr()?.port();
    tracing::info!("NPHIES poll server listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
