//! Axum control surface: `POST /replay/start`, `POST /replay/stop`, `GET /replay/status`,
//! plus the ambient `GET /metrics` scrape endpoint (`SPEC_FULL.md` §6).

use crate::error::{ReplayError, UnrecoverableReplayError};
use crate::types::ReplayParams;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::ReplayCoordinator;

pub fn router(coordinator: Arc<ReplayCoordinator>) -> Router {
    Router::new()
        .route("/replay/start", post(start))
        .route("/replay/stop", post(stop))
        .route("/replay/status", get(status))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

#[derive(Debug, Serialize)]
struct StartResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    status: &'static str,
}

async fn start(
    State(coordinator): State<Arc<ReplayCoordinator>>,
    Json(params): Json<ReplayParams>,
) -> Result<Json<StartResponse>, ApiError> {
    coordinator.start(params).await?;
    Ok(Json(StartResponse { status: "started" }))
}

async fn stop(
    State(coordinator): State<Arc<ReplayCoordinator>>,
) -> Result<Json<StopResponse>, ApiError> {
    coordinator.stop().await?;
    Ok(Json(StopResponse { status: "stopped" }))
}

async fn status(State(coordinator): State<Arc<ReplayCoordinator>>) -> Json<crate::types::ReplayState> {
    Json(coordinator.status())
}

/// Prometheus-style text exposition of `emittedCount`, `droppedCount`, `bufferDepth`, and
/// `virtualLagSeconds` (wall clock minus the engine's current virtual time; `0` while no run
/// has ever set `current_virtual_time`).
async fn metrics(State(coordinator): State<Arc<ReplayCoordinator>>) -> String {
    let state = coordinator.status();
    let virtual_lag_seconds = state
        .current_virtual_time
        .map(|virtual_now| (chrono::Utc::now() - virtual_now).num_seconds())
        .unwrap_or(0);
    format!(
        "replay_emitted_count {}\nreplay_dropped_count {}\nreplay_buffer_depth {}\nreplay_virtual_lag_seconds {}\n",
        state.emitted_count, state.dropped_count, state.buffer_depth, virtual_lag_seconds
    )
}

/// Wraps [`ReplayError`] for HTTP responses: `AlreadyRunning` is `409`, validation failures
/// are `400`, everything else is `500`.
struct ApiError(ReplayError);

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReplayError::Unrecoverable(UnrecoverableReplayError::AlreadyRunning) => {
                StatusCode::CONFLICT
            }
            ReplayError::Unrecoverable(UnrecoverableReplayError::NotRunning) => {
                StatusCode::NOT_FOUND
            }
            ReplayError::Unrecoverable(UnrecoverableReplayError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.0.to_string()).into_response()
    }
}
