//! Common test utilities and helpers for integration tests.
//!
//! Test apps are wired from in-memory and scripted drivers so every
//! backend outcome (data, failure, slowness) can be arranged up front.

use api::{create_router, AppState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use shared::config::GatewayConfig;
use shared::driver::{BackendHandle, Driver, DriverRegistry, InMemoryDriver};
use shared::models::{LogRecord, MetricKind, MetricPoint, MetricSeries, Severity, Span};
use shared::resilience::InvocationSettings;
use std::sync::Arc;

/// Trace id seeded by [`seeded_driver`].
pub const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

/// Creates a test router over the default configuration: one empty
/// in-memory backend named `local`.
pub fn test_app() -> (Router, AppState) {
    let state = AppState::from_config(GatewayConfig::default()).unwrap();
    let router = create_router(state.clone());
    (router, state)
}

/// Pairs a backend id with its driver for [`test_app_with`].
pub fn backend<D: Driver + 'static>(
    id: &'static str,
    driver: &Arc<D>,
) -> (&'static str, Arc<dyn Driver>) {
    let driver: Arc<dyn Driver> = driver.clone();
    (id, driver)
}

/// Creates a test router over the given backends.
///
/// Retries are fast so failure scenarios finish quickly.
pub fn test_app_with(backends: Vec<(&'static str, Arc<dyn Driver>)>) -> (Router, AppState) {
    let mut registry = DriverRegistry::new();
    for (id, driver) in backends {
        registry
            .register(BackendHandle::new(id, driver).with_settings(fast_settings()))
            .unwrap();
    }
    let state = AppState::new(GatewayConfig::default(), registry);
    let router = create_router(state.clone());
    (router, state)
}

/// Invocation settings with millisecond backoff.
pub fn fast_settings() -> InvocationSettings {
    InvocationSettings {
        timeout: std::time::Duration::from_secs(2),
        max_retries: 2,
        base_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        ..InvocationSettings::default()
    }
}

/// Start of the seeded trace: ten minutes ago.
pub fn trace_start() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(10)
}

/// An in-memory driver holding one trace across `checkout` and `payments`,
/// logs around it and a latency metric.
///
/// Logs:
/// - `charge declined` carries the trace id
/// - `retrying charge` has no trace id but is from `checkout`, inside the trace
/// - `cron tick` is from an unrelated service
pub fn seeded_driver() -> Arc<InMemoryDriver> {
    let t0 = trace_start();
    let driver = InMemoryDriver::new();
    driver
        .insert_spans(
            TRACE_ID,
            vec![
                Span::new("a1", "POST /checkout", "checkout", t0)
                    .with_duration(Duration::milliseconds(50)),
                Span::new("b2", "charge", "payments", t0 + Duration::milliseconds(10))
                    .with_parent("a1")
                    .with_duration(Duration::milliseconds(30)),
            ],
        )
        .unwrap();
    driver
        .insert_logs(vec![
            LogRecord::new(
                t0 + Duration::milliseconds(20),
                Severity::Error,
                "charge declined",
                "payments",
            )
            .with_trace_id(TRACE_ID)
            .with_record_id("log-1"),
            LogRecord::new(
                t0 + Duration::milliseconds(40),
                Severity::Warn,
                "retrying charge",
                "checkout",
            )
            .with_record_id("log-2"),
            LogRecord::new(t0, Severity::Info, "cron tick", "scheduler").with_record_id("log-3"),
        ])
        .unwrap();
    driver
        .insert_metrics(vec![MetricSeries::new("http.server.duration", MetricKind::Gauge)
            .with_label("service.name", "checkout")
            .with_points([MetricPoint::new(t0 + Duration::milliseconds(25), 48.0)])])
        .unwrap();
    Arc::new(driver)
}

/// Helper to make a POST request with JSON body.
pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
    .unwrap();

    read(response).await
}

/// Helper to POST a raw body.
pub async fn post_raw(app: Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap();

    read(response).await
}

/// Helper to make a GET request.
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    (status, json)
}
