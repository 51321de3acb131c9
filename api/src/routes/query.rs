//! Search endpoints.
//!
//! One endpoint per signal type, all sharing the same request body:
//!
//! - `POST /api/v1/traces/search`
//! - `POST /api/v1/logs/search`
//! - `POST /api/v1/metrics/query`
//!
//! Results from every targeted backend are merged into `data`; `backends`
//! says how each backend took part, so a partial answer is visible to the
//! caller.

use super::{bad_request, invalid_json, orchestrator_error, request_deadline, ApiError};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::models::{
    BackendSelection, LogRecord, MetricSeries, Query, Severity, SignalType, TimeRange, TraceResult,
};
use shared::orchestrator::{BackendReport, Orchestrated};
use std::collections::BTreeMap;

/// Lookback used when a request names no time range.
pub const DEFAULT_RANGE_MINUTES: i64 = 60;

/// Request body for every search endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Service name filter.
    pub service: Option<String>,
    /// Free-text filter on log bodies, span names and attributes.
    pub text: Option<String>,
    /// Trace id filter.
    pub trace_id: Option<String>,
    /// Span operation name filter.
    pub operation: Option<String>,
    /// Minimum span duration.
    pub min_duration_ms: Option<u64>,
    /// Minimum log severity.
    pub severity: Option<String>,
    /// Metric name; required on the metrics endpoint.
    pub metric_name: Option<String>,
    /// Exact attribute matches.
    pub attributes: BTreeMap<String, String>,
    /// Range start; defaults to `end` minus `time_range_minutes`.
    pub start: Option<DateTime<Utc>>,
    /// Range end; defaults to now.
    pub end: Option<DateTime<Utc>>,
    /// Lookback when `start` is not given.
    pub time_range_minutes: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Explicit backend ids; every enabled backend when absent.
    pub backends: Option<Vec<String>>,
    /// Overrides the default request deadline.
    pub timeout_ms: Option<u64>,
}

impl SearchRequest {
    /// Builds the canonical query for `signal`, resolving relative ranges
    /// against `now`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid field.
    pub fn to_query(&self, signal: SignalType, now: DateTime<Utc>) -> Result<Query, String> {
        let minutes = self.time_range_minutes.unwrap_or(DEFAULT_RANGE_MINUTES);
        if minutes <= 0 {
            return Err(format!("time_range_minutes must be positive, got {minutes}"));
        }
        let end = self.end.unwrap_or(now);
        let range = match self.start {
            Some(start) => TimeRange::new(start, end),
            None => {
                let window = Duration::try_minutes(minutes)
                    .ok_or_else(|| format!("time_range_minutes is too large: {minutes}"))?;
                TimeRange::last(window, end)
            }
        }
        .map_err(|e| e.to_string())?;

        let mut query = Query::new(signal, range);
        if let Some(service) = &self.service {
            query = query.with_service(service);
        }
        if let Some(text) = &self.text {
            query = query.with_text(text);
        }
        if let Some(trace_id) = &self.trace_id {
            query = query.with_trace_id(trace_id);
        }
        if let Some(operation) = &self.operation {
            query = query.with_operation(operation);
        }
        if let Some(ms) = self.min_duration_ms {
            query = query.with_min_duration_ms(ms);
        }
        if let Some(severity) = &self.severity {
            let severity: Severity = severity.parse().map_err(|e| format!("{e}"))?;
            query = query.with_min_severity(severity);
        }
        if let Some(name) = &self.metric_name {
            query = query.with_metric_name(name);
        }
        for (key, value) in &self.attributes {
            query = query.with_attribute(key, value);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        if let Some(backends) = &self.backends {
            if backends.is_empty() {
                return Err("backends cannot be an empty list".to_string());
            }
            let ids = backends.iter().map(String::as_str);
            query = query.with_backends(BackendSelection::only(ids));
        }
        Ok(query)
    }
}

/// Response body for every search endpoint.
#[derive(Debug, Serialize)]
pub struct SearchResponse<T> {
    /// Merged results.
    pub data: Vec<T>,
    /// Number of results returned.
    pub count: usize,
    /// True when at least one backend failed.
    pub partial: bool,
    /// How each backend took part.
    pub backends: Vec<BackendReport>,
}

impl<T> From<Orchestrated<T>> for SearchResponse<T> {
    fn from(result: Orchestrated<T>) -> Self {
        let partial = result.is_partial();
        Self {
            count: result.data.len(),
            data: result.data,
            partial,
            backends: result.backends,
        }
    }
}

type SearchResult<T> = Result<Json<SearchResponse<T>>, ApiError>;

/// Creates the search routes.
pub fn query_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/traces/search", post(search_traces))
        .route("/api/v1/logs/search", post(search_logs))
        .route("/api/v1/metrics/query", post(query_metrics))
        .with_state(state)
}

fn prepare(
    state: &AppState,
    payload: Result<Json<SearchRequest>, JsonRejection>,
    signal: SignalType,
) -> Result<(Query, tokio::time::Instant), ApiError> {
    let Json(request) = payload.map_err(|rejection| invalid_json(&rejection))?;
    let query = request.to_query(signal, Utc::now()).map_err(bad_request)?;
    let deadline = request_deadline(request.timeout_ms, state.request_timeout())?;
    Ok((query, deadline))
}

async fn search_traces(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> SearchResult<TraceResult> {
    let (query, deadline) = prepare(&state, payload, SignalType::Trace)?;
    let result = state
        .orchestrator()
        .search_traces(&query, deadline)
        .await
        .map_err(orchestrator_error)?;
    Ok(Json(result.into()))
}

async fn search_logs(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> SearchResult<LogRecord> {
    let (query, deadline) = prepare(&state, payload, SignalType::Log)?;
    let result = state
        .orchestrator()
        .search_logs(&query, deadline)
        .await
        .map_err(orchestrator_error)?;
    Ok(Json(result.into()))
}

async fn query_metrics(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> SearchResult<MetricSeries> {
    let (query, deadline) = prepare(&state, payload, SignalType::Metric)?;
    let result = state
        .orchestrator()
        .query_metrics(&query, deadline)
        .await
        .map_err(orchestrator_error)?;
    Ok(Json(result.into()))
}
