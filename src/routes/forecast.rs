use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::{ForecastParams, ForecastPayload, Initiated, JobStatus};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(start_from_query).post(start_forecast))
        .route("/status", get(job_status))
        .route("/result", get(job_result))
        .route("/:job_id", delete(cancel_job))
}

#[derive(Debug, Deserialize)]
struct JobQuery {
    #[serde(rename = "jobId", alias = "job_id")]
    job_id: Option<String>,
}

impl JobQuery {
    fn require(self) -> Result<String, AppError> {
        self.job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Missing jobId/job_id".to_string()))
    }
}

fn initiated_response(initiated: Initiated) -> Response {
    match initiated {
        Initiated::Job { .. } => (StatusCode::ACCEPTED, Json(initiated)).into_response(),
        Initiated::Immediate(_) => (StatusCode::OK, Json(initiated)).into_response(),
    }
}

async fn initiate(state: &AppState, params: ForecastParams) -> Result<Response, AppError> {
    let ticker = params.ticker.clone().unwrap_or_default();
    let initiated = state.jobs.initiate(params).await.map_err(|e| {
        warn!("Failed to start forecast for '{}': {}", ticker, e);
        e
    })?;
    Ok(initiated_response(initiated))
}

/// GET /forecast?ticker=&look_back=&horizon=
async fn start_from_query(
    State(state): State<AppState>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    info!("GET /forecast - ticker {:?}", params.ticker);
    initiate(&state, params).await
}

/// POST /forecast with a JSON body and/or query string; body fields win
async fn start_forecast(
    State(state): State<AppState>,
    Query(query): Query<ForecastParams>,
    body: Option<Json<ForecastParams>>,
) -> Result<Response, AppError> {
    let params = match body {
        Some(Json(body)) => query.merge(body),
        None => query,
    };
    info!("POST /forecast - ticker {:?}", params.ticker);
    initiate(&state, params).await
}

/// GET /forecast/status?jobId=
async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobStatus>, AppError> {
    let job_id = query.require()?;
    let status = state.jobs.status(&job_id).await?;
    info!("GET /forecast/status - job {} is {} ({}%)", job_id, status.state, status.pct);
    Ok(Json(status))
}

/// GET /forecast/result?jobId=
async fn job_result(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<ForecastPayload>, AppError> {
    let job_id = query.require()?;
    info!("GET /forecast/result - job {}", job_id);
    state.jobs.result(&job_id).await.map(Json)
}

/// DELETE /forecast/:job_id
async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, AppError> {
    info!("DELETE /forecast/{} - Cancelling job", job_id);
    state.jobs.cancel(&job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
