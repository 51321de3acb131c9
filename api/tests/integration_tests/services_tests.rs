//! Integration tests for per-service health.

use axum::http::StatusCode;
use shared::driver::InMemoryDriver;
use shared::models::SignalType;
use std::sync::Arc;

use super::common::{backend, get, seeded_driver, test_app_with};

#[tokio::test]
async fn test_service_health_from_seeded_spans() {
    let (app, _state) = test_app_with(vec![backend("local", &seeded_driver())]);

    let (status, response) = get(app, "/api/v1/services/payments/health?window_minutes=30").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["health"]["service"], "payments");
    assert_eq!(response["health"]["backend"], "local");
    assert_eq!(response["health"]["status"], "healthy");
    assert_eq!(response["health"]["span_count"], 1);
    assert_eq!(response["health"]["error_rate"], 0.0);
    assert_eq!(response["health"]["latency_p99_ms"], 30.0);
    assert_eq!(response["backends"][0]["status"], "ok");
}

#[tokio::test]
async fn test_service_health_outside_window_is_unknown() {
    let (app, _state) = test_app_with(vec![backend("local", &seeded_driver())]);

    // Seeded spans are ten minutes old; the default window is five.
    let (status, response) = get(app, "/api/v1/services/payments/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["health"]["status"], "unknown");
    assert_eq!(response["health"]["span_count"], 0);
    assert!(response["health"].get("error_rate").is_none());
}

#[tokio::test]
async fn test_service_health_rejects_bad_window() {
    for query in [
        "window_minutes=0",
        "window_minutes=-5",
        "window_minutes=9223372036854775807",
        "window_minutes=soon",
        "timeout_ms=0",
    ] {
        let (app, _state) = test_app_with(vec![backend("local", &seeded_driver())]);
        let uri = format!("/api/v1/services/payments/health?{query}");

        let (status, response) = get(app, &uri).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(response["error"], "invalid_query", "{query}");
    }
}

#[tokio::test]
async fn test_service_health_without_trace_backend() {
    let logs_only = Arc::new(InMemoryDriver::new().with_signals([SignalType::Log]));
    let (app, _state) = test_app_with(vec![backend("logs", &logs_only)]);

    let (status, response) = get(app, "/api/v1/services/payments/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response["error"], "no_backends");
}

#[tokio::test]
async fn test_service_health_backend_down() {
    let down = InMemoryDriver::new();
    down.set_available(false);
    let (app, _state) = test_app_with(vec![backend("down", &Arc::new(down))]);

    let (status, response) = get(app, "/api/v1/services/payments/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response["error"], "all_backends_failed");
    assert_eq!(response["backends"][0]["backend"], "down");
    assert_eq!(response["backends"][0]["status"], "failed");
}
