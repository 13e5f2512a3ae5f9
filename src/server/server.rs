use anyhow::{Context, Result};
use std::time::Duration;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{error, info};

use super::chat_routes::{make_avatar_routes, make_chat_routes};
use super::gallery_routes::make_gallery_routes;
use super::job_routes::make_job_routes;
use super::metrics::metrics_handler;
use super::{log_requests, state::ServerState};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

pub fn make_app(state: ServerState) -> Router {
    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    let mut app: Router = home_router
        .nest(
            "/api/images",
            make_job_routes(state.clone()).merge(make_gallery_routes(state.clone())),
        )
        .nest("/api/chat", make_chat_routes(state.clone()))
        .nest("/api/avatars", make_avatar_routes(state.clone()));

    if let Some(media_path) = &state.config.media_path {
        app = app.nest_service("/storage", ServeDir::new(media_path));
    }

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API on `state.config.port` and metrics on `metrics_port`
/// until `shutdown` fires.
pub async fn run_server(state: ServerState, metrics_port: u16, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind API port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await
    });

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("API server failed")?;

    // Metrics stay up until the API has drained.
    shutdown.cancel();
    match metrics_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server task panicked: {}", e),
    }
    info!("Server stopped");
    Ok(())
}
