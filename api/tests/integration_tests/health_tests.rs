//! Integration tests for health and server info.

use axum::http::StatusCode;
use shared::driver::InMemoryDriver;
use shared::models::SignalType;
use std::sync::Arc;

use super::common::{backend, get, test_app, test_app_with};

#[tokio::test]
async fn test_health_check() {
    let (app, _state) = test_app();

    let (status, response) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert_eq!(response["service"], "otel-query-gateway");
}

#[tokio::test]
async fn test_server_info_lists_backends() {
    let logs_only = InMemoryDriver::new()
        .with_signals([SignalType::Log])
        .without_trace_id_filter();
    let logs_only = Arc::new(logs_only);
    let (app, _state) = test_app_with(vec![
        backend("tempo", &Arc::new(InMemoryDriver::new())),
        backend("loki", &logs_only),
    ]);

    let (status, response) = get(app, "/api/v1/server/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["name"], "otel-query-gateway");
    assert!(response["version"].is_string());
    assert_eq!(response["cache"]["enabled"], true);

    let backends = response["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["id"], "loki");
    assert_eq!(backends[0]["kind"], "in_memory");
    assert_eq!(backends[0]["signals"], serde_json::json!(["log"]));
    assert_eq!(backends[0]["trace_id_filter"], false);
    assert_eq!(backends[1]["id"], "tempo");
}
