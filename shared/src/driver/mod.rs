//! Backend driver contract.
//!
//! Every backend family (OTLP collector, Grafana stack, Elastic APM,
//! OpenSearch, the in-memory development backend) is reached through the
//! [`Driver`] trait. The orchestrator, cache and correlation engine depend on
//! this trait only.
//!
//! Drivers do not retry. Retries, timeouts and concurrency limits are applied
//! by [`crate::resilience::ResilientInvoker`] around every call.

pub mod memory;
pub mod registry;

use crate::models::{
    LogRecord, MetricSeries, Query, ServiceHealth, SignalType, TimeRange, TraceResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub use crate::models::{BackendId, HealthStatus};
pub use memory::{InMemoryDriver, InMemoryFixture};
pub use registry::{BackendHandle, BackendHealth, DriverRegistry, RegistryError, Targets};

/// Errors returned by driver calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The backend could not be reached or refused the request.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("Backend call timed out: {0}")]
    Timeout(String),

    /// The backend rejected the query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The backend answered with an error that retrying will not fix.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// The backend does not offer this signal type.
    #[error("Signal '{0}' is not supported by this backend")]
    Unsupported(SignalType),
}

impl DriverError {
    /// Returns true for transient failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::InvalidQuery(_) => "invalid_query",
            Self::BackendError(_) => "backend_error",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Backend families the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// An OpenTelemetry collector exposing OTLP query endpoints.
    OtelCollector,
    /// Grafana stack: Tempo (traces), Loki (logs), Prometheus/Mimir (metrics).
    Grafana,
    /// Elastic Cloud APM.
    ElasticCloud,
    /// OpenSearch with trace analytics.
    Opensearch,
    /// In-process store for development and tests.
    InMemory,
}

impl BackendKind {
    /// Signals a backend of this family offers unless configured otherwise.
    #[must_use]
    pub fn default_signals(self) -> BTreeSet<SignalType> {
        match self {
            Self::Opensearch => [SignalType::Trace, SignalType::Log].into_iter().collect(),
            Self::OtelCollector | Self::Grafana | Self::ElasticCloud | Self::InMemory => {
                SignalType::ALL.into_iter().collect()
            }
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OtelCollector => write!(f, "otel_collector"),
            Self::Grafana => write!(f, "grafana"),
            Self::ElasticCloud => write!(f, "elastic_cloud"),
            Self::Opensearch => write!(f, "opensearch"),
            Self::InMemory => write!(f, "in_memory"),
        }
    }
}

/// What a driver can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Signal types the backend can be queried for.
    pub signals: BTreeSet<SignalType>,
    /// Whether the backend can filter logs by trace id natively.
    pub trace_id_filter: bool,
}

impl Capabilities {
    /// Every signal, with native trace-id filtering.
    #[must_use]
    pub fn all() -> Self {
        Self {
            signals: SignalType::ALL.into_iter().collect(),
            trace_id_filter: true,
        }
    }

    /// Returns true if `signal` is offered.
    #[must_use]
    pub fn supports(&self, signal: SignalType) -> bool {
        self.signals.contains(&signal)
    }

    /// Narrows the offered signals to those also present in `configured`.
    #[must_use]
    pub fn restricted_to(mut self, configured: &BTreeSet<SignalType>) -> Self {
        self.signals.retain(|s| configured.contains(s));
        self
    }
}

/// The capability contract every backend driver satisfies.
///
/// Implementations convert native responses into the canonical models and
/// classify failures into [`DriverError`]. A driver asked for a signal it does
/// not offer returns [`DriverError::Unsupported`], which is what the default
/// method bodies do.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The backend family.
    fn kind(&self) -> BackendKind;

    /// What this driver offers.
    fn capabilities(&self) -> Capabilities;

    /// Searches for traces matching `query`.
    async fn search_traces(&self, query: &Query) -> Result<Vec<TraceResult>, DriverError> {
        let _ = query;
        Err(DriverError::Unsupported(SignalType::Trace))
    }

    /// Searches for log records matching `query`.
    async fn search_logs(&self, query: &Query) -> Result<Vec<LogRecord>, DriverError> {
        let _ = query;
        Err(DriverError::Unsupported(SignalType::Log))
    }

    /// Fetches metric series matching `query`.
    async fn query_metrics(&self, query: &Query) -> Result<Vec<MetricSeries>, DriverError> {
        let _ = query;
        Err(DriverError::Unsupported(SignalType::Metric))
    }

    /// Summarizes the health of one service over `window`.
    ///
    /// Derived from trace telemetry, so a backend without traces reports
    /// [`DriverError::Unsupported`] for the trace signal.
    async fn service_health(
        &self,
        service: &str,
        window: TimeRange,
    ) -> Result<ServiceHealth, DriverError> {
        let _ = (service, window);
        Err(DriverError::Unsupported(SignalType::Trace))
    }

    /// Checks the backend is reachable and healthy.
    async fn health_check(&self) -> HealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DriverError::Unavailable("down".into()).is_retryable());
        assert!(DriverError::Timeout("30s".into()).is_retryable());
        assert!(!DriverError::InvalidQuery("bad".into()).is_retryable());
        assert!(!DriverError::BackendError("500".into()).is_retryable());
        assert!(!DriverError::Unsupported(SignalType::Metric).is_retryable());
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(DriverError::Timeout(String::new()).kind(), "timeout");
        assert_eq!(
            DriverError::Unsupported(SignalType::Log).kind(),
            "unsupported"
        );
    }

    #[test]
    fn test_default_signals() {
        let os = BackendKind::Opensearch.default_signals();
        assert!(os.contains(&SignalType::Trace));
        assert!(os.contains(&SignalType::Log));
        assert!(!os.contains(&SignalType::Metric));
        assert_eq!(BackendKind::Grafana.default_signals().len(), 3);
    }

    #[test]
    fn test_capabilities_restricted() {
        let configured: BTreeSet<_> = [SignalType::Log, SignalType::Metric].into_iter().collect();
        let caps = Capabilities::all().restricted_to(&configured);

        assert!(!caps.supports(SignalType::Trace));
        assert!(caps.supports(SignalType::Log));
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"elastic_cloud\"").unwrap();
        assert_eq!(kind, BackendKind::ElasticCloud);
        assert_eq!(BackendKind::OtelCollector.to_string(), "otel_collector");
    }

    struct TracesOnly;

    #[async_trait]
    impl Driver for TracesOnly {
        fn kind(&self) -> BackendKind {
            BackendKind::OtelCollector
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                signals: [SignalType::Trace].into_iter().collect(),
                trace_id_filter: false,
            }
        }

        async fn search_traces(&self, _query: &Query) -> Result<Vec<TraceResult>, DriverError> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::healthy("ok")
        }
    }

    #[tokio::test]
    async fn test_default_methods_report_unsupported() {
        use chrono::Utc;

        let driver = TracesOnly;
        let now = Utc::now();
        let range = TimeRange::new(now, now).unwrap();
        let query = Query::logs(range);

        assert_eq!(
            driver.search_logs(&query).await,
            Err(DriverError::Unsupported(SignalType::Log))
        );
        assert!(driver.search_traces(&query).await.unwrap().is_empty());
        assert_eq!(
            driver.service_health("api", range).await,
            Err(DriverError::Unsupported(SignalType::Trace))
        );
    }
}
