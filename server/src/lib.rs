//! HTTP control surface for a supervised server.
//!
//! Every handler forwards to the [`Supervisor`] handle and relays its result;
//! the router itself keeps no state of its own.

mod api_error;

use std::future::Future;
use std::path::Path;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use mcctl_core::Supervisor;
use mcctl_core::SupervisorError;
use mcctl_core::SupervisorStatus;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::debug;
use tracing::info;

pub use api_error::ApiError;

pub const ALREADY_STOPPED: &str = "Server already stopped";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub fn router(supervisor: Supervisor, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/command", post(command))
        .route("/logs", get(logs))
        .route("/status", get(status))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

/// Serves `router` on `listener` until `shutdown` resolves and in-flight
/// requests have completed.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root() -> StatusCode {
    StatusCode::OK
}

async fn start(State(supervisor): State<Supervisor>) -> Result<String, ApiError> {
    info!("start requested");
    Ok(supervisor.start().await?)
}

async fn stop(State(supervisor): State<Supervisor>) -> Result<String, ApiError> {
    info!("stop requested");
    match supervisor.stop().await {
        Ok(output) => Ok(output),
        Err(SupervisorError::NotRunning) => Ok(ALREADY_STOPPED.to_string()),
        Err(err) => Err(err.into()),
    }
}

async fn command(
    State(supervisor): State<Supervisor>,
    Json(request): Json<CommandRequest>,
) -> Result<String, ApiError> {
    info!(command = %request.command, "command received");
    Ok(supervisor.send(request.command).await?)
}

async fn logs(State(supervisor): State<Supervisor>) -> Json<Vec<String>> {
    debug!("logs requested");
    Json(supervisor.logs().snapshot())
}

async fn status(State(supervisor): State<Supervisor>) -> Result<Json<SupervisorStatus>, ApiError> {
    Ok(Json(supervisor.status().await?))
}
