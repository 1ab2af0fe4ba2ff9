use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::config::ProgressMode;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    mode: &'static str,
    active_workers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    info!("GET /health - Health check");
    let mode = match state.jobs.config().mode {
        ProgressMode::PollDriven => "poll",
        ProgressMode::Background => "background",
    };
    Json(HealthResponse {
        status: "ok",
        backend: state.jobs.backend_name(),
        mode,
        active_workers: state.jobs.active_workers(),
    })
}
