//! Per-service health summarized from span telemetry.

use super::query::TimeRange;
use super::trace::{Span, SpanStatus};
use super::BackendId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error rate, in percent, above which a service is degraded.
pub const DEGRADED_ERROR_RATE: f64 = 5.0;

/// Error rate, in percent, above which a service is unhealthy.
pub const UNHEALTHY_ERROR_RATE: f64 = 10.0;

/// Health classification of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Error rate at or below [`DEGRADED_ERROR_RATE`].
    Healthy,
    /// Error rate above [`DEGRADED_ERROR_RATE`].
    Degraded,
    /// Error rate above [`UNHEALTHY_ERROR_RATE`].
    Unhealthy,
    /// No telemetry in the window.
    Unknown,
}

impl ServiceStatus {
    /// Classifies an error rate given in percent.
    #[must_use]
    pub fn from_error_rate(percent: f64) -> Self {
        if percent > UNHEALTHY_ERROR_RATE {
            Self::Unhealthy
        } else if percent > DEGRADED_ERROR_RATE {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health of one service over a time window, as seen by one backend.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::models::{ServiceHealth, ServiceStatus, Span, TimeRange};
///
/// let now = Utc::now();
/// let window = TimeRange::last(Duration::minutes(5), now).unwrap();
/// let spans = vec![
///     Span::new("a", "GET /", "api", now).with_duration(Duration::milliseconds(20)),
///     Span::new("b", "GET /", "api", now).with_error("boom"),
/// ];
///
/// let health = ServiceHealth::from_spans("api", window, &spans);
/// assert_eq!(health.status, ServiceStatus::Unhealthy);
/// assert_eq!(health.error_rate, Some(50.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Service name as requested.
    pub service: String,
    /// Backend that answered; set by the orchestrator.
    #[serde(default)]
    pub backend: BackendId,
    /// Classification.
    pub status: ServiceStatus,
    /// Window the figures cover.
    pub window: TimeRange,
    /// Spans observed in the window.
    pub span_count: usize,
    /// Share of error spans, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    /// 99th percentile span duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p99_ms: Option<f64>,
    /// Spans per second over the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<f64>,
    /// End of the latest span seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ServiceHealth {
    /// A service with no telemetry in `window`.
    #[must_use]
    pub fn unknown(service: impl Into<String>, window: TimeRange) -> Self {
        Self {
            service: service.into(),
            backend: BackendId::default(),
            status: ServiceStatus::Unknown,
            window,
            span_count: 0,
            error_rate: None,
            latency_p99_ms: None,
            request_rate: None,
            last_seen: None,
        }
    }

    /// Summarizes the spans a service emitted in `window`.
    ///
    /// The caller selects the spans; they are not filtered again here.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_spans<'a>(
        service: impl Into<String>,
        window: TimeRange,
        spans: impl IntoIterator<Item = &'a Span>,
    ) -> Self {
        let spans: Vec<&Span> = spans.into_iter().collect();
        if spans.is_empty() {
            return Self::unknown(service, window);
        }

        let total = spans.len();
        let errors = spans
            .iter()
            .filter(|s| s.status == SpanStatus::Error)
            .count();
        let error_rate = errors as f64 * 100.0 / total as f64;

        let mut durations: Vec<f64> = spans
            .iter()
            .map(|s| s.duration().num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000.0)
            .collect();
        durations.sort_by(f64::total_cmp);
        // Nearest rank.
        let rank = (total * 99).div_ceil(100);
        let latency_p99_ms = durations[rank.saturating_sub(1)];

        let seconds = window.duration().num_milliseconds() as f64 / 1_000.0;
        let request_rate = (seconds > 0.0).then(|| total as f64 / seconds);

        Self {
            service: service.into(),
            backend: BackendId::default(),
            status: ServiceStatus::from_error_rate(error_rate),
            window,
            span_count: total,
            error_rate: Some(error_rate),
            latency_p99_ms: Some(latency_p99_ms),
            request_rate,
            last_seen: spans.iter().map(|s| s.end_time()).max(),
        }
    }
}
