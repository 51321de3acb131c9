//! Integration tests for backend health and cache control.

use axum::http::StatusCode;
use serde_json::json;
use shared::testutil::ScriptedDriver;
use std::sync::Arc;

use super::common::{backend, get, post_json, seeded_driver, test_app, test_app_with};

#[tokio::test]
async fn test_repeated_search_served_from_cache() {
    let driver = Arc::new(ScriptedDriver::new());
    let (app, _state) = test_app_with(vec![backend("scripted", &driver)]);
    let body = json!({
        "service": "checkout",
        "start": "2024-01-15T10:00:00Z",
        "end": "2024-01-15T11:00:00Z"
    });

    let (status, first) = post_json(app.clone(), "/api/v1/logs/search", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["backends"][0]["cache"], "loaded");

    let (_, second) = post_json(app.clone(), "/api/v1/logs/search", body).await;
    assert_eq!(second["backends"][0]["cache"], "hit");
    assert_eq!(driver.calls(), 1);

    let (status, stats) = get(app, "/api/v1/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["hit_rate"], 0.5);
}

#[tokio::test]
async fn test_invalidate_backend() {
    let (app, _state) = test_app_with(vec![backend("local", &seeded_driver())]);
    let body = json!({"start": "2024-01-15T10:00:00Z", "end": "2024-01-15T11:00:00Z"});
    post_json(app.clone(), "/api/v1/logs/search", body.clone()).await;
    post_json(app.clone(), "/api/v1/traces/search", body).await;

    let (status, response) =
        post_json(app.clone(), "/api/v1/cache/invalidate/local", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["backend"], "local");
    assert_eq!(response["invalidated"], 2);

    let (_, stats) = get(app, "/api/v1/cache/stats").await;
    assert_eq!(stats["entries"], 0);
}

#[tokio::test]
async fn test_invalidate_unknown_backend_is_404() {
    let (app, _state) = test_app();

    let (status, response) = post_json(app, "/api/v1/cache/invalidate/nope", json!({})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "unknown_backend");
}

#[tokio::test]
async fn test_clear_cache() {
    let (app, state) = test_app();
    let body = json!({"start": "2024-01-15T10:00:00Z", "end": "2024-01-15T11:00:00Z"});
    post_json(app.clone(), "/api/v1/logs/search", body).await;
    assert_eq!(state.cache().stats().entries, 1);

    let (status, response) = post_json(app, "/api/v1/cache/clear", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["invalidated"], 1);
    assert!(response.get("backend").is_none());
    assert_eq!(state.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_unhealthy_backend_cache_invalidated() {
    let healthy = Arc::new(ScriptedDriver::new());
    let sick = Arc::new(ScriptedDriver::new().unhealthy());
    let (app, state) = test_app_with(vec![backend("healthy", &healthy), backend("sick", &sick)]);
    let body = json!({"start": "2024-01-15T10:00:00Z", "end": "2024-01-15T11:00:00Z"});
    post_json(app.clone(), "/api/v1/logs/search", body).await;
    assert_eq!(state.cache().stats().entries, 2);

    let (status, response) = get(app, "/api/v1/backends/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["healthy"], 1);
    assert_eq!(response["unhealthy"], 1);
    assert_eq!(response["invalidated"], 1);
    assert_eq!(response["backends"][1]["backend"], "sick");
    assert_eq!(response["backends"][1]["healthy"], false);
    assert_eq!(response["backends"][1]["detail"], "scripted failure");
    assert_eq!(state.cache().stats().entries, 1);
}
