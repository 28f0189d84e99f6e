//! Integration tests for the health and metrics endpoint

use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use klinewatch::core::http::{create_router, AppState};
use klinewatch::metrics::Metrics;
use klinewatch::models::Ohlcv;
use klinewatch::store::CandleStore;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;

fn test_server(state: AppState) -> TestServer {
    TestServer::new(create_router(state)).expect("start test server")
}

#[tokio::test]
async fn health_endpoint_reports_empty_store() {
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    let server = test_server(AppState::new(metrics, CandleStore::shared()));

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "klinewatch");
    assert_eq!(body["buckets"], 0);
    assert!(body["latest_bucket"].is_null());
    assert!(body["uptime_seconds"].as_u64().is_some());
}

#[tokio::test]
async fn health_endpoint_reports_latest_bucket() {
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    let store = CandleStore::shared();
    {
        let mut guard = store.write();
        let bucket = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        guard.upsert(bucket, "BTCUSDT", Ohlcv::flat(dec!(50000)));
        guard.open_bucket(bucket + chrono::Duration::minutes(1));
    }
    let server = test_server(AppState::new(metrics, store));

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["buckets"], 2);
    assert_eq!(body["latest_bucket"], "2024-03-01T12:01:00Z");
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    metrics.alerts_total.inc_by(2);
    let server = test_server(AppState::new(metrics, CandleStore::shared()));

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    let body = response.text();
    assert!(body.contains("klinewatch_alerts_total 2"));
    assert!(body.contains("klinewatch_cycles_total"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    let server = test_server(AppState::new(metrics, CandleStore::shared()));
    let response = server.get("/api/strategies").expect_failure().await;
    assert_eq!(response.status_code(), 404);
}
