//! Integration tests for the search endpoints.
//!
//! Tests cover:
//! - Fan-out and merge across backends
//! - Partial and total backend failure
//! - Request validation
//! - Per-request deadlines

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;
use shared::driver::DriverError;
use shared::models::{Span, TraceResult};
use shared::testutil::ScriptedDriver;
use std::sync::Arc;

use super::common::{
    backend, post_json, post_raw, seeded_driver, test_app, test_app_with, trace_start, TRACE_ID,
};

fn trace(id: &str, spans: usize) -> TraceResult {
    let t0 = Utc::now() - Duration::minutes(5);
    let spans = (0..spans)
        .map(|i| Span::new(format!("{id}-{i}"), "GET /cart", "cart", t0))
        .collect();
    TraceResult::new(id, "", spans)
}

#[tokio::test]
async fn test_trace_search_survives_one_failing_backend() {
    let b1 = Arc::new(ScriptedDriver::new().with_traces(vec![trace("t1", 2)]));
    let b2 = Arc::new(ScriptedDriver::new().failing_with(vec![
        DriverError::Timeout("slow".to_string()),
        DriverError::Timeout("slow".to_string()),
        DriverError::Unavailable("down".to_string()),
    ]));
    let b3 = Arc::new(ScriptedDriver::new().with_traces(vec![trace("t2", 1)]));
    let (app, _state) = test_app_with(vec![
        backend("b1", &b1),
        backend("b2", &b2),
        backend("b3", &b3),
    ]);

    let (status, response) = post_json(app, "/api/v1/traces/search", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["count"], 2);
    assert_eq!(response["partial"], true);

    let spans: usize = response["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["spans"].as_array().unwrap().len())
        .sum();
    assert_eq!(spans, 3);

    let reports = response["backends"].as_array().unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0]["status"], "ok");
    assert_eq!(reports[1]["backend"], "b2");
    assert_eq!(reports[1]["status"], "failed");
    assert_eq!(reports[1]["kind"], "unavailable");
    assert_eq!(reports[1]["attempts"], 3);
    assert_eq!(reports[2]["status"], "ok");
    assert_eq!(b2.calls(), 3);
}

#[tokio::test]
async fn test_results_stamped_with_backend() {
    let seeded = seeded_driver();
    let (app, _state) = test_app_with(vec![backend("local", &seeded)]);

    let (status, response) = post_json(
        app,
        "/api/v1/traces/search",
        json!({"trace_id": TRACE_ID, "service": "payments"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["count"], 1);
    assert_eq!(response["data"][0]["trace_id"], TRACE_ID);
    assert_eq!(response["data"][0]["backend"], "local");
    assert_eq!(response["partial"], false);
}

#[tokio::test]
async fn test_log_search_filters_and_orders() {
    let seeded = seeded_driver();
    let (app, _state) = test_app_with(vec![backend("local", &seeded)]);

    let (status, response) = post_json(
        app,
        "/api/v1/logs/search",
        json!({"severity": "warn", "time_range_minutes": 30}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<&str> = response["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["retrying charge", "charge declined"]);
}

#[tokio::test]
async fn test_metric_query() {
    let seeded = seeded_driver();
    let (app, _state) = test_app_with(vec![backend("local", &seeded)]);

    let (status, response) = post_json(
        app,
        "/api/v1/metrics/query",
        json!({
            "metric_name": "http.server.duration",
            "start": trace_start() - Duration::minutes(1),
            "end": Utc::now(),
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["count"], 1);
    assert_eq!(response["data"][0]["name"], "http.server.duration");
    assert_eq!(response["data"][0]["backend"], "local");
}

#[tokio::test]
async fn test_metric_query_requires_name() {
    let (app, _state) = test_app();

    let (status, response) = post_json(app, "/api/v1/metrics/query", json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_query");
}

#[tokio::test]
async fn test_invalid_limit_rejected() {
    let (app, _state) = test_app();

    let (status, response) =
        post_json(app, "/api/v1/logs/search", json!({"limit": 1_000_000})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_query");
    assert!(response["message"].as_str().unwrap().contains("Limit"));
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let (app, _state) = test_app();

    let (status, response) = post_raw(app, "/api/v1/logs/search", "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_json");
}

#[tokio::test]
async fn test_invalid_time_range_rejected() {
    let (app, _state) = test_app();

    let (status, response) = post_json(
        app,
        "/api/v1/traces/search",
        json!({"start": "2024-01-15T11:00:00Z", "end": "2024-01-15T10:00:00Z"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_query");
}

#[tokio::test]
async fn test_all_backends_failed_is_503() {
    let down = Arc::new(
        ScriptedDriver::new().always_failing(DriverError::BackendError("boom".to_string())),
    );
    let (app, _state) = test_app_with(vec![backend("down", &down)]);

    let (status, response) = post_json(app, "/api/v1/logs/search", json!({})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response["error"], "all_backends_failed");
    assert_eq!(response["backends"][0]["backend"], "down");
    assert_eq!(response["backends"][0]["kind"], "backend_error");
    assert_eq!(response["backends"][0]["attempts"], 1);
}

#[tokio::test]
async fn test_unknown_backend_selection_is_503() {
    let (app, _state) = test_app();

    let (status, response) =
        post_json(app, "/api/v1/logs/search", json!({"backends": ["nope"]})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response["error"], "no_backends");
    assert_eq!(response["backends"][0]["backend"], "nope");
    assert_eq!(response["backends"][0]["kind"], "unknown_backend");
}

#[tokio::test]
async fn test_explicit_selection_limits_fan_out() {
    let a = Arc::new(ScriptedDriver::new().with_traces(vec![trace("ta", 1)]));
    let b = Arc::new(ScriptedDriver::new().with_traces(vec![trace("tb", 1)]));
    let (app, _state) = test_app_with(vec![backend("a", &a), backend("b", &b)]);

    let (status, response) =
        post_json(app, "/api/v1/traces/search", json!({"backends": ["b"]})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["count"], 1);
    assert_eq!(response["data"][0]["trace_id"], "tb");
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_deadline_yields_partial_result() {
    let fast = Arc::new(ScriptedDriver::new().with_traces(vec![trace("t1", 1)]));
    let slow = Arc::new(
        ScriptedDriver::new()
            .with_traces(vec![trace("t2", 1)])
            .with_delay(std::time::Duration::from_secs(1)),
    );
    let (app, _state) = test_app_with(vec![backend("fast", &fast), backend("slow", &slow)]);

    let (status, response) =
        post_json(app, "/api/v1/traces/search", json!({"timeout_ms": 50})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["count"], 1);
    assert_eq!(response["partial"], true);
    assert_eq!(response["backends"][1]["backend"], "slow");
    assert_eq!(response["backends"][1]["kind"], "timeout");
    assert_eq!(response["backends"][1]["attempts"], 0);
}

#[tokio::test]
async fn test_zero_timeout_rejected() {
    let (app, _state) = test_app();

    let (status, _response) =
        post_json(app, "/api/v1/traces/search", json!({"timeout_ms": 0})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_time_range_rejected() {
    let (app, _state) = test_app();

    let (status, response) = post_json(
        app,
        "/api/v1/logs/search",
        json!({"time_range_minutes": i64::MAX}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_query");
}
