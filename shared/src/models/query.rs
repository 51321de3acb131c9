//! Query data model.
//!
//! A [`Query`] is the single logical request that the orchestrator fans out to
//! every targeted backend. It is immutable once built: fields are private and
//! the `with_*` builders consume and return the value.

use super::log::Severity;
use super::BackendId;
use super::SignalType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Upper bound for [`Query::limit`].
pub const MAX_LIMIT: usize = 10_000;

/// Default limit for trace searches.
pub const DEFAULT_TRACE_LIMIT: usize = 100;

/// Default limit for log searches.
pub const DEFAULT_LOG_LIMIT: usize = 1_000;

/// Default limit for metric queries (number of series).
pub const DEFAULT_METRIC_LIMIT: usize = 1_000;

/// Errors raised while building or validating a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The end of the time range lies before its start.
    #[error("End time {end} is before start time {start}")]
    InvalidTimeRange {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },

    /// The limit is zero or exceeds [`MAX_LIMIT`].
    #[error("Limit must be between 1 and {MAX_LIMIT}, got {0}")]
    InvalidLimit(usize),

    /// A metric query was built without a metric name.
    #[error("Metric queries require a metric name")]
    MissingMetricName,

    /// A filter field was present but empty.
    #[error("Filter field '{0}' cannot be empty")]
    EmptyFilter(&'static str),

    /// A time bound fell outside the representable calendar range.
    #[error("Time range is out of bounds: {0}")]
    TimeOutOfRange(&'static str),

    /// The query was sent to an operation for another signal type.
    #[error("Expected a {expected} query, got a {actual} query")]
    SignalMismatch {
        /// Signal the operation serves.
        expected: SignalType,
        /// Signal of the query.
        actual: SignalType,
    },
}

/// An inclusive time range. `end >= start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a time range.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] if `end` is before `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, QueryError> {
        if end < start {
            return Err(QueryError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a range covering the last `window` up to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TimeOutOfRange`] if `now - window` precedes the
    /// earliest representable timestamp.
    pub fn last(window: Duration, now: DateTime<Utc>) -> Result<Self, QueryError> {
        let window = window.max(Duration::zero());
        let start = now
            .checked_sub_signed(window)
            .ok_or(QueryError::TimeOutOfRange("start"))?;
        Ok(Self { start, end: now })
    }

    /// Start of the range.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the range.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the range.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true if `ts` lies within the range, both ends inclusive.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Expands the range by `pad` on both ends. Negative pads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TimeOutOfRange`] if either padded bound leaves
    /// the representable calendar range.
    pub fn pad(&self, pad: Duration) -> Result<Self, QueryError> {
        let pad = pad.max(Duration::zero());
        let start = self
            .start
            .checked_sub_signed(pad)
            .ok_or(QueryError::TimeOutOfRange("start"))?;
        let end = self
            .end
            .checked_add_signed(pad)
            .ok_or(QueryError::TimeOutOfRange("end"))?;
        Ok(Self { start, end })
    }
}

/// Which backends a query targets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "backends")]
pub enum BackendSelection {
    /// Every enabled backend offering the query's signal type.
    #[default]
    AllEnabled,
    /// Exactly these backends.
    Only(BTreeSet<BackendId>),
}

impl BackendSelection {
    /// Builds an explicit selection.
    pub fn only<I, B>(ids: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<BackendId>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }
}

/// Structured filter carried by a [`Query`].
///
/// Every field is optional; an empty filter matches everything in the time
/// range. Ordered collections keep the serialized form deterministic, which
/// fingerprinting relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Free-text match against span operation names or log bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Exact trace identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Service name must be one of these.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub services: BTreeSet<String>,

    /// Exact span operation name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Minimum trace duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,

    /// Minimum log severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,

    /// Metric name (required for metric queries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,

    /// Attribute (or metric label) equality constraints.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// A logical query against one signal type.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::models::{Query, SignalType, TimeRange};
///
/// let range = TimeRange::last(Duration::minutes(15), Utc::now()).unwrap();
/// let query = Query::logs(range)
///     .with_service("checkout")
///     .with_text("timeout")
///     .with_limit(50);
///
/// assert_eq!(query.signal(), SignalType::Log);
/// assert!(query.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    signal: SignalType,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    filter: QueryFilter,
    time_range: TimeRange,
    limit: usize,
    #[serde(default)]
    backends: BackendSelection,
}

impl Query {
    /// Creates a query for the given signal with default limit and no filter.
    #[must_use]
    pub fn new(signal: SignalType, time_range: TimeRange) -> Self {
        let limit = match signal {
            SignalType::Trace => DEFAULT_TRACE_LIMIT,
            SignalType::Log => DEFAULT_LOG_LIMIT,
            SignalType::Metric => DEFAULT_METRIC_LIMIT,
        };
        Self {
            signal,
            service: None,
            filter: QueryFilter::default(),
            time_range,
            limit,
            backends: BackendSelection::AllEnabled,
        }
    }

    /// Creates a trace search.
    #[must_use]
    pub fn traces(time_range: TimeRange) -> Self {
        Self::new(SignalType::Trace, time_range)
    }

    /// Creates a log search.
    #[must_use]
    pub fn logs(time_range: TimeRange) -> Self {
        Self::new(SignalType::Log, time_range)
    }

    /// Creates a metric query for `metric_name`.
    #[must_use]
    pub fn metrics(metric_name: impl Into<String>, time_range: TimeRange) -> Self {
        Self::new(SignalType::Metric, time_range).with_metric_name(metric_name)
    }

    /// Sets the target service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the free-text filter.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.filter.text = Some(text.into());
        self
    }

    /// Restricts results to a single trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.filter.trace_id = Some(trace_id.into());
        self
    }

    /// Restricts results to records emitted by any of `services`.
    #[must_use]
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.services = services.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the operation name filter.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.filter.operation = Some(operation.into());
        self
    }

    /// Sets the minimum trace duration.
    #[must_use]
    pub fn with_min_duration_ms(mut self, ms: u64) -> Self {
        self.filter.min_duration_ms = Some(ms);
        self
    }

    /// Sets the minimum log severity.
    #[must_use]
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.filter.min_severity = Some(severity);
        self
    }

    /// Sets the metric name.
    #[must_use]
    pub fn with_metric_name(mut self, name: impl Into<String>) -> Self {
        self.filter.metric_name = Some(name.into());
        self
    }

    /// Adds an attribute equality constraint.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.attributes.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole filter.
    #[must_use]
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the time range.
    #[must_use]
    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    /// Sets the backend selection.
    #[must_use]
    pub fn with_backends(mut self, backends: BackendSelection) -> Self {
        self.backends = backends;
        self
    }

    /// The signal type queried.
    #[must_use]
    pub fn signal(&self) -> SignalType {
        self.signal
    }

    /// The target service, if any.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// The structured filter.
    #[must_use]
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// The time range.
    #[must_use]
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// The result limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The backend selection.
    #[must_use]
    pub fn backends(&self) -> &BackendSelection {
        &self.backends
    }

    /// Returns true if `service` satisfies both the target service and the
    /// service-set filter. Comparison is case-insensitive.
    #[must_use]
    pub fn matches_service(&self, service: &str) -> bool {
        if let Some(target) = self.service.as_deref() {
            if !target.eq_ignore_ascii_case(service) {
                return false;
            }
        }
        self.filter.services.is_empty()
            || self
                .filter
                .services
                .iter()
                .any(|s| s.eq_ignore_ascii_case(service))
    }

    /// Validates the query.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The limit is zero or above [`MAX_LIMIT`]
    /// - A metric query has no metric name
    /// - The trace id, service or metric name filter is present but blank
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(QueryError::InvalidLimit(self.limit));
        }
        if self.service.as_deref().is_some_and(is_blank) {
            return Err(QueryError::EmptyFilter("service"));
        }
        if self.filter.trace_id.as_deref().is_some_and(is_blank) {
            return Err(QueryError::EmptyFilter("trace_id"));
        }
        match self.filter.metric_name.as_deref() {
            Some(name) if is_blank(name) => return Err(QueryError::EmptyFilter("metric_name")),
            None if self.signal == SignalType::Metric => {
                return Err(QueryError::MissingMetricName)
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the canonical form of this query.
    ///
    /// Strings are trimmed, service names lowercased and empty values dropped,
    /// so that logically identical queries compare (and fingerprint) equal.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let trimmed = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };
        let filter = QueryFilter {
            text: trimmed(&self.filter.text),
            trace_id: trimmed(&self.filter.trace_id),
            services: self
                .filter
                .services
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            operation: trimmed(&self.filter.operation),
            min_duration_ms: self.filter.min_duration_ms,
            min_severity: self.filter.min_severity,
            metric_name: trimmed(&self.filter.metric_name),
            attributes: self
                .filter
                .attributes
                .iter()
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
        };
        Self {
            signal: self.signal,
            service: trimmed(&self.service).map(|s| s.to_lowercase()),
            filter,
            time_range: self.time_range,
            limit: self.limit,
            backends: self.backends.clone(),
        }
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}
