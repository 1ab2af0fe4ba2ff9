mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::*;
use tickercast::client::{Activation, CacheStatus, ForecastTracker, PollerConfig, ResultCache};
use tickercast::external::compute_backend::ComputeBackendClient;

#[tokio::test]
async fn test_forwarding_server_relays_job_lifecycle() {
    let backend_url = spawn_server(build_test_app(poll_config())).await;
    let app = build_forwarding_app(&backend_url);

    let health = body_json(get(&app, "/health").await).await;
    assert_eq!(health["backend"], "remote");

    let job_id = start_job(&app, "AAPL").await;
    let mut seen = Vec::new();
    for _ in 0..5 {
        let json = body_json(get(&app, &format!("/forecast/status?jobId={}", job_id)).await).await;
        seen.push(json["pct"].as_u64().unwrap());
    }
    assert_eq!(seen, vec![20, 40, 60, 80, 100]);

    let response = get(&app, &format!("/forecast/result?jobId={}", job_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["forecast"].as_array().unwrap().len(), 10);

    let response = send(&app, Method::DELETE, &format!("/forecast/{}", job_id), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_forwarding_server_maps_backend_errors() {
    let backend_url = spawn_server(build_test_app(poll_config())).await;
    let app = build_forwarding_app(&backend_url);

    let response = get(&app, "/forecast/status?jobId=missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        Method::POST,
        "/forecast",
        Some(json!({ "ticker": "AAPL", "horizon": 0 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Method::POST,
        "/forecast",
        Some(json!({ "ticker": "AAPL", "sync": true })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ticker"], "AAPL");
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = build_forwarding_app(&format!("http://{}", addr));
    let response = send(&app, Method::POST, "/forecast", Some(json!({ "ticker": "AAPL" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_tracker_polls_server_over_http() {
    let backend_url = spawn_server(build_test_app(poll_config())).await;
    let client = ComputeBackendClient::new(&backend_url, Duration::from_secs(5)).unwrap();
    let tracker = ForecastTracker::new(
        Arc::new(client),
        ResultCache::new(),
        PollerConfig {
            poll_interval: Duration::from_millis(10),
            ..PollerConfig::default()
        },
    );

    assert!(matches!(tracker.activate("AAPL"), Activation::Started { .. }));

    let entry = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(entry) = tracker.cache().get("AAPL") {
                if entry.is_terminal() {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("forecast finished");

    assert_eq!(entry.status, CacheStatus::Done);
    assert_eq!(entry.pct, 100);
    assert_eq!(entry.result.map(|r| r.forecast.len()), Some(10));

    tokio::time::timeout(Duration::from_secs(1), async {
        while tracker.is_polling() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poll loop exited");
    assert!(matches!(tracker.activate("AAPL"), Activation::Cached(_)));
}
