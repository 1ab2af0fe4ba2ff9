#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

use tickercast::app::create_app;
use tickercast::config::{JobConfig, ProgressMode};
use tickercast::external::compute_backend::ComputeBackendClient;
use tickercast::services::forecast_engine::DriftForecastEngine;
use tickercast::services::job_service::{Backend, JobService};
use tickercast::state::AppState;
use tickercast::store::InMemoryJobStore;

/// Every status call applies one step
pub fn poll_config() -> JobConfig {
    JobConfig {
        mode: ProgressMode::PollDriven,
        ..JobConfig::default()
    }
}

/// Fast background worker so tests finish in well under a second
pub fn background_config() -> JobConfig {
    JobConfig {
        mode: ProgressMode::Background,
        tick: Duration::from_millis(10),
        ..JobConfig::default()
    }
}

pub fn local_service(config: JobConfig) -> Arc<JobService> {
    Arc::new(JobService::local(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(DriftForecastEngine::synthetic()),
        config,
    ))
}

/// Full router over an in-process job registry with synthetic forecasts
pub fn build_test_app(config: JobConfig) -> Router {
    create_app(AppState {
        jobs: local_service(config),
    })
}

/// Router that forwards every job call to the server at `base_url`
pub fn build_forwarding_app(base_url: &str) -> Router {
    let client = ComputeBackendClient::new(base_url, Duration::from_secs(5)).unwrap();
    create_app(AppState {
        jobs: Arc::new(JobService::new(Backend::Remote(client), poll_config())),
    })
}

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Start a job and return its id, asserting the 202
pub async fn start_job(app: &Router, ticker: &str) -> String {
    let response = send(
        app,
        Method::POST,
        "/forecast",
        Some(serde_json::json!({ "ticker": ticker, "look_back": 60, "horizon": 10 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["jobId"].as_str().unwrap().to_string()
}
