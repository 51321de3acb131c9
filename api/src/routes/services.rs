//! Per-service health endpoint.
//!
//! `GET /api/v1/services/{service}/health` summarizes a service's recent
//! spans as reported by the first backend able to answer.

use super::{bad_request, orchestrator_error, request_deadline, ApiError};
use crate::state::AppState;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use shared::models::TimeRange;
use shared::orchestrator::ServiceHealthReport;

/// Window summarized when the request does not say.
pub const DEFAULT_WINDOW_MINUTES: i64 = 5;

/// Query string of the service health endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ServiceHealthParams {
    /// Minutes of telemetry, ending now, to summarize.
    #[serde(default)]
    pub window_minutes: Option<i64>,
    /// Overrides the default request deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Creates the service routes.
pub fn service_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/services/{service}/health", get(service_health))
        .with_state(state)
}

async fn service_health(
    State(state): State<AppState>,
    Path(service): Path<String>,
    params: Result<Query<ServiceHealthParams>, QueryRejection>,
) -> Result<Json<ServiceHealthReport>, ApiError> {
    let Query(params) = params.map_err(|rejection| bad_request(rejection.body_text()))?;
    let window = health_window(params.window_minutes)?;
    let deadline = request_deadline(params.timeout_ms, state.request_timeout())?;

    state
        .orchestrator()
        .service_health(&service, window, deadline)
        .await
        .map(Json)
        .map_err(orchestrator_error)
}

fn health_window(window_minutes: Option<i64>) -> Result<TimeRange, ApiError> {
    let minutes = window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
    if minutes <= 0 {
        return Err(bad_request(format!(
            "window_minutes must be positive, got {minutes}"
        )));
    }
    let window = Duration::try_minutes(minutes)
        .ok_or_else(|| bad_request(format!("window_minutes is too large: {minutes}")))?;
    TimeRange::last(window, Utc::now()).map_err(|e| bad_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_window_defaults_to_five_minutes() {
        let window = health_window(None).unwrap();
        assert_eq!(window.duration(), Duration::minutes(DEFAULT_WINDOW_MINUTES));
    }

    #[test]
    fn test_health_window_rejects_bad_sizes() {
        for minutes in [0, -3, i64::MAX, i64::MAX / 60_000] {
            let (status, _) = health_window(Some(minutes)).unwrap_err();
            assert_eq!(status, axum::http::StatusCode::BAD_REQUEST, "{minutes}");
        }
    }
}
