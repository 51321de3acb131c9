//! Trace and span data models.
//!
//! Defines the normalized shape every backend's trace results are converted
//! into before they reach the cache and the orchestrator.

use super::attribute::{AttributeValue, Attributes};
use super::query::TimeRange;
use super::BackendId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use validator::Validate;

/// Status code for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// No status was recorded.
    #[default]
    Unset,
    /// The span completed without error.
    Ok,
    /// The span encountered an error.
    Error,
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Kind of span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Default span kind (internal operation).
    #[default]
    Internal,
    /// The span represents a server handling a request.
    Server,
    /// The span represents a client making a request.
    Client,
    /// The span represents a producer sending a message.
    Producer,
    /// The span represents a consumer receiving a message.
    Consumer,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}

/// A span representing a unit of work in a distributed trace.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::models::{Span, SpanKind};
///
/// let span = Span::new("span-456", "HTTP GET /api/users", "api-service", Utc::now())
///     .with_kind(SpanKind::Server)
///     .with_duration(Duration::milliseconds(42))
///     .with_attribute("http.status_code", 200);
///
/// assert!(span.validate_span().is_ok());
/// assert_eq!(span.duration_ms(), 42);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Span {
    /// Unique identifier for this span.
    #[validate(length(min = 1, message = "Span ID cannot be empty"))]
    pub span_id: String,

    /// The parent span ID (None for root spans).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// The service that generated this span.
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service: String,

    /// The operation this span measures.
    #[validate(length(min = 1, message = "Operation name cannot be empty"))]
    pub operation: String,

    /// The kind of span.
    #[serde(default)]
    pub kind: SpanKind,

    /// Timestamp when the span started.
    pub start_time: DateTime<Utc>,

    /// Duration in nanoseconds.
    #[serde(default)]
    pub duration_ns: u64,

    /// The status of the span.
    #[serde(default)]
    pub status: SpanStatus,

    /// Optional status message (usually set for errors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Additional attributes for the span.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Errors that can occur during span validation.
#[derive(Debug, Error)]
pub enum SpanValidationError {
    /// The span ID is empty.
    #[error("Span ID cannot be empty")]
    EmptySpanId,

    /// The operation name is empty.
    #[error("Operation name cannot be empty")]
    EmptyOperation,

    /// The service name is empty.
    #[error("Service name cannot be empty")]
    EmptyService,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Span {
    /// Creates a zero-length span starting at `start_time`.
    #[must_use]
    pub fn new(
        span_id: impl Into<String>,
        operation: impl Into<String>,
        service: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            span_id: span_id.into(),
            parent_span_id: None,
            service: service.into(),
            operation: operation.into(),
            kind: SpanKind::default(),
            start_time,
            duration_ns: 0,
            status: SpanStatus::default(),
            status_message: None,
            attributes: Attributes::new(),
        }
    }

    /// Sets the parent span ID.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets the span kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the span status.
    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Marks the span as failed with a message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = SpanStatus::Error;
        self.status_message = Some(message.into());
        self
    }

    /// Sets the duration. Negative durations are clamped to zero.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ns = duration
            .num_nanoseconds()
            .and_then(|ns| u64::try_from(ns).ok())
            .unwrap_or(0);
        self
    }

    /// Adds an attribute to the span.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the duration of the span.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::nanoseconds(i64::try_from(self.duration_ns).unwrap_or(i64::MAX))
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration().num_milliseconds()
    }

    /// Returns the end timestamp (`start + duration`), saturating at the
    /// latest representable instant.
    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            .checked_add_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Validates the span.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The span ID is empty
    /// - The operation is empty
    /// - The service is empty
    pub fn validate_span(&self) -> Result<(), SpanValidationError> {
        if self.span_id.is_empty() {
            return Err(SpanValidationError::EmptySpanId);
        }
        if self.operation.is_empty() {
            return Err(SpanValidationError::EmptyOperation);
        }
        if self.service.is_empty() {
            return Err(SpanValidationError::EmptyService);
        }
        self.validate()?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct TraceResultRepr {
    trace_id: String,
    #[serde(default)]
    backend: BackendId,
    #[serde(default)]
    spans: Vec<Span>,
}

impl From<TraceResultRepr> for TraceResult {
    fn from(repr: TraceResultRepr) -> Self {
        Self::new(repr.trace_id, repr.backend, repr.spans)
    }
}

/// All spans of one trace as returned by one backend.
///
/// Spans are kept ordered by start time ascending, ties broken by span id.
/// Every constructor and mutator restores that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TraceResultRepr")]
pub struct TraceResult {
    /// The trace ID.
    pub trace_id: String,

    /// The backend this result came from.
    pub backend: BackendId,

    spans: Vec<Span>,
}

impl TraceResult {
    /// Creates a trace result, ordering the spans and dropping duplicate span ids
    /// (the first occurrence wins).
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        backend: impl Into<BackendId>,
        spans: Vec<Span>,
    ) -> Self {
        let mut result = Self {
            trace_id: trace_id.into(),
            backend: backend.into(),
            spans: Vec::with_capacity(spans.len()),
        };
        result.merge_spans(spans);
        result
    }

    /// The spans, ordered by start time.
    #[must_use]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Returns the number of spans in this trace.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Adds spans whose ids are not yet present.
    pub fn merge_spans(&mut self, spans: impl IntoIterator<Item = Span>) {
        let mut seen: HashSet<String> = self.spans.iter().map(|s| s.span_id.clone()).collect();
        for span in spans {
            if seen.insert(span.span_id.clone()) {
                self.spans.push(span);
            }
        }
        self.spans.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id))
        });
    }

    /// Returns spans without a parent, or whose parent is not part of this result.
    #[must_use]
    pub fn root_spans(&self) -> Vec<&Span> {
        let ids: HashSet<&str> = self.spans.iter().map(|s| s.span_id.as_str()).collect();
        self.spans
            .iter()
            .filter(|s| {
                s.parent_span_id
                    .as_deref()
                    .is_none_or(|parent| !ids.contains(parent))
            })
            .collect()
    }

    /// Returns `[min start, max end]` over all spans, or `None` if there are none.
    #[must_use]
    pub fn observed_range(&self) -> Option<TimeRange> {
        let start = self.spans.iter().map(|s| s.start_time).min()?;
        let end = self.spans.iter().map(Span::end_time).max()?;
        TimeRange::new(start, end).ok()
    }

    /// Earliest span start.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.spans.first().map(|s| s.start_time)
    }

    /// Returns the total duration of the trace.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.observed_range().map(|r| r.duration())
    }

    /// Returns all services involved in this trace.
    #[must_use]
    pub fn services(&self) -> BTreeSet<&str> {
        self.spans.iter().map(|s| s.service.as_str()).collect()
    }

    /// Returns true if any span has an error status.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.spans.iter().any(|s| s.status == SpanStatus::Error)
    }
}
