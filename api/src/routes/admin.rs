//! Operational endpoints: server info, backend health and cache control.

use super::{api_error, ApiError};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::cache::CacheStats;
use shared::driver::{BackendHealth, BackendKind};
use shared::models::{BackendId, SignalType};
use std::collections::BTreeSet;

/// One registered backend as reported by `/api/v1/server/info`.
#[derive(Debug, Serialize)]
pub struct BackendInfo {
    /// Backend id.
    pub id: BackendId,
    /// Backend family.
    pub kind: BackendKind,
    /// Whether the backend is queried by default.
    pub enabled: bool,
    /// Signals queried on this backend.
    pub signals: BTreeSet<SignalType>,
    /// Whether log searches can filter by trace id natively.
    pub trace_id_filter: bool,
}

/// Response of `GET /api/v1/server/info`.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// Configured server name.
    pub name: String,
    /// Gateway version.
    pub version: &'static str,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_secs: i64,
    /// Registered backends, ordered by id.
    pub backends: Vec<BackendInfo>,
    /// Cache counters.
    pub cache: CacheStats,
}

/// Response of `GET /api/v1/backends/health`.
#[derive(Debug, Serialize)]
pub struct BackendsHealthResponse {
    /// Number of healthy backends.
    pub healthy: usize,
    /// Number of unhealthy backends.
    pub unhealthy: usize,
    /// Cache entries dropped for unhealthy backends.
    pub invalidated: usize,
    /// Per-backend results, ordered by id.
    pub backends: Vec<BackendHealth>,
}

/// Response of the cache invalidation endpoints.
#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    /// Backend whose entries were dropped; absent when the whole cache was
    /// cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendId>,
    /// Number of entries dropped.
    pub invalidated: usize,
}

/// Creates the admin routes.
pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/server/info", get(server_info))
        .route("/api/v1/backends/health", get(backends_health))
        .route("/api/v1/cache/stats", get(cache_stats))
        .route(
            "/api/v1/cache/invalidate/{backend}",
            post(invalidate_backend),
        )
        .route("/api/v1/cache/clear", post(clear_cache))
        .with_state(state)
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfo> {
    let backends = state
        .registry()
        .iter()
        .map(|handle| BackendInfo {
            id: handle.id.clone(),
            kind: handle.kind,
            enabled: handle.enabled,
            signals: handle.signals.clone(),
            trace_id_filter: handle.capabilities().trace_id_filter,
        })
        .collect();

    Json(ServerInfo {
        name: state.config().server.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
        backends,
        cache: state.cache().stats(),
    })
}

/// Health-checks every enabled backend concurrently. Cached results of unhealthy
/// backends are dropped so the next query goes to the backend again.
async fn backends_health(State(state): State<AppState>) -> Json<BackendsHealthResponse> {
    let backends = state.registry().health_check_all().await;

    let mut invalidated = 0;
    for health in backends.iter().filter(|h| !h.status.healthy) {
        let dropped = state.cache().invalidate(&health.backend);
        tracing::warn!(
            backend = %health.backend,
            detail = %health.status.detail,
            dropped,
            "Backend unhealthy, invalidated cached results"
        );
        invalidated += dropped;
    }

    let healthy = backends.iter().filter(|h| h.status.healthy).count();
    Json(BackendsHealthResponse {
        healthy,
        unhealthy: backends.len() - healthy,
        invalidated,
        backends,
    })
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache().stats())
}

async fn invalidate_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let backend = BackendId::new(backend);
    if state.registry().get(&backend).is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "unknown_backend",
            format!("Backend '{backend}' is not registered"),
        ));
    }

    let invalidated = state.cache().invalidate(&backend);
    tracing::info!(backend = %backend, invalidated, "Invalidated cached results");
    Ok(Json(InvalidateResponse {
        backend: Some(backend),
        invalidated,
    }))
}

async fn clear_cache(State(state): State<AppState>) -> Json<InvalidateResponse> {
    let invalidated = state.cache().clear();
    tracing::info!(invalidated, "Cleared response cache");
    Json(InvalidateResponse {
        backend: None,
        invalidated,
    })
}
