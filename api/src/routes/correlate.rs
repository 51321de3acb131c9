//! Trace correlation endpoint.
//!
//! `POST /api/v1/correlate` locates a trace by id and returns it together
//! with the logs and metrics observed around it.

use super::{api_error, bad_request, invalid_json, orchestrator_error, request_deadline, ApiError};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use shared::correlation::{CorrelationError, CorrelationRequest, CorrelationResult};
use shared::models::TimeRange;

/// How far back the trace is looked for when the request does not say.
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 60;

/// Request body for correlation.
#[derive(Debug, Deserialize)]
pub struct CorrelateRequest {
    /// Trace to correlate.
    pub trace_id: String,
    /// Padding around the trace's observed span; the configured default
    /// when absent.
    #[serde(default)]
    pub pad_ms: Option<u64>,
    /// How far back to look for the trace.
    #[serde(default)]
    pub lookback_minutes: Option<i64>,
    /// Metrics to fetch over the correlation window.
    #[serde(default)]
    pub metric_names: Vec<String>,
    /// Maximum number of correlated log records.
    #[serde(default)]
    pub log_limit: Option<usize>,
    /// Overrides the default request deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Creates the correlation routes.
pub fn correlate_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/correlate", post(correlate))
        .with_state(state)
}

async fn correlate(
    State(state): State<AppState>,
    payload: Result<Json<CorrelateRequest>, JsonRejection>,
) -> Result<Json<CorrelationResult>, ApiError> {
    let Json(request) = payload.map_err(|rejection| invalid_json(&rejection))?;

    let trace_id = request.trace_id.trim();
    if trace_id.is_empty() {
        return Err(bad_request("trace_id cannot be empty"));
    }
    let lookback = request.lookback_minutes.unwrap_or(DEFAULT_LOOKBACK_MINUTES);
    if lookback <= 0 {
        return Err(bad_request(format!(
            "lookback_minutes must be positive, got {lookback}"
        )));
    }
    let deadline = request_deadline(request.timeout_ms, state.request_timeout())?;

    let search_range = Duration::try_minutes(lookback)
        .ok_or_else(|| bad_request(format!("lookback_minutes is too large: {lookback}")))
        .and_then(|window| {
            TimeRange::last(window, Utc::now()).map_err(|e| bad_request(e.to_string()))
        })?;
    let mut correlation = CorrelationRequest::new(trace_id, search_range);
    if let Some(pad_ms) = request.pad_ms {
        let pad = i64::try_from(pad_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .ok_or_else(|| bad_request(format!("pad_ms is too large: {pad_ms}")))?;
        correlation = correlation.with_pad(pad);
    }
    for name in request.metric_names {
        correlation = correlation.with_metric(name);
    }
    if let Some(limit) = request.log_limit {
        correlation = correlation.with_log_limit(limit);
    }

    tracing::debug!(trace_id, lookback_minutes = lookback, "Correlating trace");

    match state.correlation().correlate(&correlation, deadline).await {
        Ok(result) => Ok(Json(result)),
        Err(err @ (CorrelationError::TraceNotFound(_) | CorrelationError::EmptyTrace(_))) => {
            Err(api_error(StatusCode::NOT_FOUND, "trace_not_found", err.to_string()))
        }
        Err(err @ CorrelationError::InvalidWindow(_)) => Err(bad_request(err.to_string())),
        Err(CorrelationError::Lookup(err)) => Err(orchestrator_error(err)),
    }
}
