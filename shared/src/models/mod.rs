//! Canonical data models for the query gateway.
//!
//! Every backend driver converts its native responses into these types, so the
//! cache, correlation engine and orchestrator never see backend-specific data.

pub mod attribute;
pub mod backend;
pub mod log;
pub mod metric;
pub mod query;
pub mod service;
pub mod trace;

use serde::{Deserialize, Serialize};

pub use attribute::{AttributeValue, Attributes};
pub use backend::{BackendId, HealthStatus};
pub use log::{LogRecord, LogValidationError, ParseSeverityError, Severity};
pub use metric::{MetricKind, MetricPoint, MetricSeries, MetricValidationError};
pub use query::{BackendSelection, Query, QueryError, QueryFilter, TimeRange};
pub use service::{ServiceHealth, ServiceStatus};
pub use trace::{Span, SpanKind, SpanStatus, SpanValidationError, TraceResult};

/// The three observability signal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Distributed traces.
    Trace,
    /// Log records.
    Log,
    /// Metric time series.
    Metric,
}

impl SignalType {
    /// All signal types.
    pub const ALL: [SignalType; 3] = [SignalType::Trace, SignalType::Log, SignalType::Metric];
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Log => write!(f, "log"),
            Self::Metric => write!(f, "metric"),
        }
    }
}
