//! API route definitions.
//!
//! Every handler answers errors with the same JSON body:
//!
//! ```json
//! {"error": "invalid_query", "message": "Limit must be between 1 and 10000"}
//! ```
//!
//! Failures that involved backends also carry the per-backend reports.

mod admin;
mod correlate;
mod health;
mod query;
mod services;

pub use admin::admin_routes;
pub use correlate::correlate_routes;
pub use health::health_routes;
pub use query::query_routes;
pub use services::service_routes;

use axum::{extract::rejection::JsonRejection, http::StatusCode, Json};
use serde::Serialize;
use shared::orchestrator::{BackendReport, OrchestratorError};
use std::time::Duration;
use tokio::time::Instant;

/// Error response body shared by all endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error type.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Per-backend reports, when backends were involved.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<BackendReport>,
}

/// Rejection returned by handlers.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(
    status: StatusCode,
    error: &'static str,
    message: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
            backends: Vec::new(),
        }),
    )
}

pub(crate) fn invalid_json(rejection: &JsonRejection) -> ApiError {
    api_error(
        StatusCode::BAD_REQUEST,
        "invalid_json",
        rejection.body_text(),
    )
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "invalid_query", message)
}

/// Maps an orchestrator failure to a response.
///
/// Invalid queries are the caller's fault (400). Having no backend to ask,
/// or every backend failing, is a 503. A deadline never yields 504: it shows
/// up as per-backend annotations on a successful response instead.
pub(crate) fn orchestrator_error(err: OrchestratorError) -> ApiError {
    let (status, error) = match &err {
        OrchestratorError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "invalid_query"),
        OrchestratorError::NoBackends { .. } => (StatusCode::SERVICE_UNAVAILABLE, "no_backends"),
        OrchestratorError::AllBackendsFailed { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "all_backends_failed")
        }
    };
    let message = err.to_string();
    let backends = err.reports().to_vec();
    (
        status,
        Json(ErrorResponse {
            error,
            message,
            backends,
        }),
    )
}

/// Resolves the deadline of one request from an optional per-request
/// timeout, falling back to `default`.
pub(crate) fn request_deadline(
    timeout_ms: Option<u64>,
    default: Duration,
) -> Result<Instant, ApiError> {
    let timeout = match timeout_ms {
        Some(0) => return Err(bad_request("timeout_ms must be at least 1")),
        Some(ms) => Duration::from_millis(ms),
        None => default,
    };
    Ok(Instant::now() + timeout)
}
