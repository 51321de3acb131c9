//! Integration tests for trace correlation.

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;
use shared::driver::InMemoryDriver;
use shared::models::{LogRecord, Severity, SignalType};
use std::sync::Arc;

use super::common::{
    backend, post_json, seeded_driver, test_app, test_app_with, trace_start, TRACE_ID,
};

/// A log-only backend that cannot filter by trace id.
fn legacy_logs() -> Arc<InMemoryDriver> {
    let t0 = trace_start();
    let driver = InMemoryDriver::new()
        .with_signals([SignalType::Log])
        .without_trace_id_filter();
    driver
        .insert_logs(vec![
            LogRecord::new(
                t0 + Duration::milliseconds(5),
                Severity::Info,
                "cart loaded",
                "checkout",
            ),
            LogRecord::new(
                t0 + Duration::milliseconds(5),
                Severity::Info,
                "cron tick",
                "scheduler",
            ),
            LogRecord::new(
                t0 - Duration::minutes(1),
                Severity::Info,
                "cart loaded",
                "checkout",
            ),
        ])
        .unwrap();
    Arc::new(driver)
}

#[tokio::test]
async fn test_correlate_joins_logs_and_metrics() {
    let (app, _state) = test_app_with(vec![
        backend("local", &seeded_driver()),
        backend("legacy", &legacy_logs()),
    ]);

    let (status, response) = post_json(
        app,
        "/api/v1/correlate",
        json!({"trace_id": TRACE_ID, "metric_names": ["http.server.duration"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["trace"]["trace_id"], TRACE_ID);
    assert_eq!(response["trace"]["spans"].as_array().unwrap().len(), 2);
    assert_eq!(response["window"]["pad_ms"], 5000);

    let logs = response["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["body"], "charge declined");
    assert_eq!(logs[0]["match_kind"], "exact");
    assert_eq!(logs[0]["backend"], "local");
    assert_eq!(logs[1]["body"], "cart loaded");
    assert_eq!(logs[1]["match_kind"], "fallback");
    assert_eq!(logs[1]["backend"], "legacy");

    let metrics = response["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0]["name"], "http.server.duration");
    assert!(response["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_correlate_with_custom_pad() {
    let (app, _state) = test_app_with(vec![backend("local", &seeded_driver())]);

    let (status, response) = post_json(
        app,
        "/api/v1/correlate",
        json!({"trace_id": TRACE_ID, "pad_ms": 0}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["window"]["pad_ms"], 0);
    assert_eq!(response["window"]["observed"], response["window"]["window"]);
}

#[tokio::test]
async fn test_correlate_unknown_trace_is_404() {
    let (app, _state) = test_app();

    let (status, response) =
        post_json(app, "/api/v1/correlate", json!({"trace_id": "deadbeef"})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "trace_not_found");
}

#[tokio::test]
async fn test_correlate_validates_request() {
    let (app, _state) = test_app();

    let (status, _) = post_json(app.clone(), "/api/v1/correlate", json!({"trace_id": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/correlate",
        json!({"trace_id": "abc", "lookback_minutes": -5}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, response) = post_json(app, "/api/v1/correlate", json!({"pad_ms": 10})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_json");
}

#[tokio::test]
async fn test_correlate_rejects_out_of_range_durations() {
    let seeded = seeded_driver();

    for body in [
        json!({"trace_id": TRACE_ID, "pad_ms": 9_000_000_000_000_000_u64}),
        json!({"trace_id": TRACE_ID, "pad_ms": u64::MAX}),
        json!({"trace_id": TRACE_ID, "lookback_minutes": i64::MAX}),
    ] {
        let (app, _state) = test_app_with(vec![backend("local", &seeded)]);
        let (status, response) = post_json(app, "/api/v1/correlate", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_query");
    }
}
