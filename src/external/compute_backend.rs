use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::AppError;
use crate::models::{ForecastParams, ForecastPayload, ForecastRequest, Initiated, JobStatus};

/// Client for a remote forecast service exposing the `/forecast` job API.
///
/// Used by the server to forward work to an external compute backend and by
/// the client poller to talk to a running server.
#[derive(Clone)]
pub struct ComputeBackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl ComputeBackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Upstream(format!("failed to build compute client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `sync` asks the backend to answer with the finished forecast instead of a job id
    pub async fn initiate(&self, request: &ForecastRequest, sync: bool) -> Result<Initiated, AppError> {
        let body = ForecastParams {
            ticker: Some(request.ticker.clone()),
            look_back: Some(request.look_back.into()),
            horizon: Some(request.horizon.into()),
            sync: sync.then_some(true),
        };
        let resp = self
            .client
            .post(format!("{}/forecast", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(unreachable_backend)?;

        decode(resp).await
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        let resp = self
            .client
            .get(format!("{}/forecast/status", self.base_url))
            .query(&[("jobId", job_id)])
            .send()
            .await
            .map_err(unreachable_backend)?;

        decode(resp).await
    }

    pub async fn result(&self, job_id: &str) -> Result<ForecastPayload, AppError> {
        let resp = self
            .client
            .get(format!("{}/forecast/result", self.base_url))
            .query(&[("jobId", job_id)])
            .send()
            .await
            .map_err(unreachable_backend)?;

        decode(resp).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        let resp = self
            .client
            .delete(format!("{}/forecast/{}", self.base_url, job_id))
            .send()
            .await
            .map_err(unreachable_backend)?;

        check_status(resp).await.map(|_| ())
    }
}

fn unreachable_backend(err: reqwest::Error) -> AppError {
    AppError::Upstream(format!("compute backend unreachable: {}", err))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    debug!("Compute backend returned {}: {}", status, body);
    match status {
        StatusCode::NOT_FOUND => Err(AppError::NotFound),
        StatusCode::BAD_REQUEST => Err(AppError::Validation(error_message(&body))),
        StatusCode::TOO_MANY_REQUESTS => Err(AppError::RateLimited),
        _ => Err(AppError::Upstream(format!("compute backend returned {}", status))),
    }
}

/// Pull `error` out of a `{"error": ...}` body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AppError> {
    check_status(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| AppError::Upstream(format!("invalid compute backend response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_json_field() {
        assert_eq!(error_message(r#"{"error":"horizon must be between 1 and 60"}"#), "horizon must be between 1 and 60");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_base_url_drops_trailing_slash() {
        let client = ComputeBackendClient::new("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
    }
}
