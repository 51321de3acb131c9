//! In-memory backend driver.
//!
//! Holds spans, log records and metric series in process memory and answers
//! queries against them with the same filter semantics a remote backend
//! applies. Used for development, demos and tests.

use super::{BackendKind, Capabilities, Driver, DriverError};
use crate::models::attribute::attributes_match;
use crate::models::{
    BackendId, HealthStatus, LogRecord, LogValidationError, MetricSeries, MetricValidationError,
    Query, ServiceHealth, SignalType, Span, SpanValidationError, TimeRange, TraceResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Label keys checked when a metric query filters by service.
const SERVICE_LABELS: [&str; 3] = ["service.name", "service_name", "service"];

/// Errors raised while loading a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The fixture is not valid JSON for [`InMemoryFixture`].
    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] serde_json::Error),

    /// A span failed validation.
    #[error("Invalid span in trace '{trace_id}': {source}")]
    InvalidSpan {
        /// Trace the span belongs to.
        trace_id: String,
        /// Validation failure.
        source: SpanValidationError,
    },

    /// A log record failed validation.
    #[error("Invalid log record: {0}")]
    InvalidLog(#[from] LogValidationError),

    /// A metric series failed validation.
    #[error("Invalid metric series: {0}")]
    InvalidMetric(#[from] MetricValidationError),
}

/// Seed data for an [`InMemoryDriver`].
///
/// ```json
/// {
///   "traces": [{"trace_id": "t1", "spans": [...]}],
///   "logs": [{"timestamp": "...", "body": "...", "service": "api"}],
///   "metrics": [{"name": "cpu", "kind": "gauge", "points": [...]}]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryFixture {
    /// Traces to load.
    #[serde(default)]
    pub traces: Vec<TraceResult>,
    /// Log records to load.
    #[serde(default)]
    pub logs: Vec<LogRecord>,
    /// Metric series to load.
    #[serde(default)]
    pub metrics: Vec<MetricSeries>,
}

impl InMemoryFixture {
    /// Parses and validates a JSON fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or any record is invalid.
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        let fixture: Self = serde_json::from_str(json)?;
        fixture.validate_fixture()?;
        Ok(fixture)
    }

    /// Validates every record.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate_fixture(&self) -> Result<(), FixtureError> {
        for trace in &self.traces {
            for span in trace.spans() {
                span.validate_span()
                    .map_err(|source| FixtureError::InvalidSpan {
                        trace_id: trace.trace_id.clone(),
                        source,
                    })?;
            }
        }
        for log in &self.logs {
            log.validate_record()?;
        }
        for series in &self.metrics {
            series.validate_series()?;
        }
        Ok(())
    }
}

/// In-memory driver.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::driver::{Driver, InMemoryDriver};
/// use shared::models::{LogRecord, Query, Severity, TimeRange};
///
/// # tokio_test::block_on(async {
/// let driver = InMemoryDriver::new();
/// let now = Utc::now();
/// driver
///     .insert_logs(vec![LogRecord::new(now, Severity::Error, "Disk full", "storage")])
///     .unwrap();
///
/// let range = TimeRange::new(now - Duration::minutes(1), now).unwrap();
/// let logs = driver.search_logs(&Query::logs(range).with_text("disk")).await.unwrap();
/// assert_eq!(logs.len(), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryDriver {
    /// Spans grouped by `trace_id`.
    traces: Arc<RwLock<BTreeMap<String, Vec<Span>>>>,
    logs: Arc<RwLock<Vec<LogRecord>>>,
    metrics: Arc<RwLock<Vec<MetricSeries>>>,
    capabilities: Capabilities,
    available: AtomicBool,
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_error() -> DriverError {
    DriverError::BackendError("Failed to acquire lock on in-memory store".to_string())
}

impl InMemoryDriver {
    /// Creates an empty driver offering every signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            traces: Arc::new(RwLock::new(BTreeMap::new())),
            logs: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(RwLock::new(Vec::new())),
            capabilities: Capabilities::all(),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a driver seeded with `fixture`.
    #[must_use]
    pub fn from_fixture(fixture: InMemoryFixture) -> Self {
        let driver = Self::new();
        {
            let mut traces = driver
                .traces
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for trace in fixture.traces {
                traces
                    .entry(trace.trace_id.clone())
                    .or_default()
                    .extend(trace.spans().iter().cloned());
            }
        }
        *driver
            .logs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = fixture.logs;
        *driver
            .metrics
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = fixture.metrics;
        driver
    }

    /// Replaces the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Restricts the offered signals.
    #[must_use]
    pub fn with_signals(mut self, signals: impl IntoIterator<Item = SignalType>) -> Self {
        self.capabilities.signals = signals.into_iter().collect();
        self
    }

    /// Stops advertising native trace-id filtering for logs.
    #[must_use]
    pub fn without_trace_id_filter(mut self) -> Self {
        self.capabilities.trace_id_filter = false;
        self
    }

    /// Simulates an outage: while unavailable every call fails with
    /// [`DriverError::Unavailable`] and health checks report unhealthy.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Adds spans to a trace.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn insert_spans(
        &self,
        trace_id: impl Into<String>,
        spans: impl IntoIterator<Item = Span>,
    ) -> Result<(), DriverError> {
        let mut traces = self.traces.write().map_err(|_| lock_error())?;
        traces.entry(trace_id.into()).or_default().extend(spans);
        Ok(())
    }

    /// Adds log records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn insert_logs(&self, records: Vec<LogRecord>) -> Result<(), DriverError> {
        let mut logs = self.logs.write().map_err(|_| lock_error())?;
        logs.extend(records);
        Ok(())
    }

    /// Adds metric series. Points of a series with the same name and labels
    /// as an existing one are merged into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn insert_metrics(&self, series: Vec<MetricSeries>) -> Result<(), DriverError> {
        let mut metrics = self.metrics.write().map_err(|_| lock_error())?;
        for new in series {
            match metrics
                .iter_mut()
                .find(|s| s.name == new.name && s.labels == new.labels)
            {
                Some(existing) => existing.extend_points(new.points().iter().copied()),
                None => metrics.push(new),
            }
        }
        Ok(())
    }

    /// Counts of stored spans, log records and metric series.
    ///
    /// # Errors
    ///
    /// Returns an error if a store lock is poisoned.
    pub fn counts(&self) -> Result<(usize, usize, usize), DriverError> {
        let spans = self
            .traces
            .read()
            .map_err(|_| lock_error())?
            .values()
            .map(Vec::len)
            .sum();
        let logs = self.logs.read().map_err(|_| lock_error())?.len();
        let metrics = self.metrics.read().map_err(|_| lock_error())?.len();
        Ok((spans, logs, metrics))
    }

    fn check(&self, signal: SignalType) -> Result<(), DriverError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable(
                "In-memory backend marked unavailable".to_string(),
            ));
        }
        if !self.capabilities.supports(signal) {
            return Err(DriverError::Unsupported(signal));
        }
        Ok(())
    }
}

fn trace_matches(trace: &TraceResult, query: &Query) -> bool {
    let filter = query.filter();
    let range = query.time_range();

    let Some(observed) = trace.observed_range() else {
        return false;
    };
    if observed.start() > range.end() || observed.end() < range.start() {
        return false;
    }

    if let Some(ref trace_id) = filter.trace_id {
        if &trace.trace_id != trace_id {
            return false;
        }
    }

    if (query.service().is_some() || !filter.services.is_empty())
        && !trace
            .spans()
            .iter()
            .any(|s| query.matches_service(&s.service))
    {
        return false;
    }

    if let Some(ref operation) = filter.operation {
        if !trace.spans().iter().any(|s| &s.operation == operation) {
            return false;
        }
    }

    if let Some(ref text) = filter.text {
        let pattern = text.to_lowercase();
        if !trace
            .spans()
            .iter()
            .any(|s| s.operation.to_lowercase().contains(&pattern))
        {
            return false;
        }
    }

    if let Some(min_ms) = filter.min_duration_ms {
        let duration_ms = u64::try_from(observed.duration().num_milliseconds()).unwrap_or(0);
        if duration_ms < min_ms {
            return false;
        }
    }

    if !filter.attributes.is_empty()
        && !trace
            .spans()
            .iter()
            .any(|s| attributes_match(&s.attributes, &filter.attributes))
    {
        return false;
    }

    true
}

fn log_matches(log: &LogRecord, query: &Query, text: Option<&str>) -> bool {
    let filter = query.filter();

    if !query.time_range().contains(log.timestamp) {
        return false;
    }
    if let Some(ref trace_id) = filter.trace_id {
        if log.trace_id.as_ref() != Some(trace_id) {
            return false;
        }
    }
    if !query.matches_service(&log.service) {
        return false;
    }
    if let Some(min) = filter.min_severity {
        if log.severity < min {
            return false;
        }
    }
    if let Some(pattern) = text {
        if !log.body.to_lowercase().contains(pattern) {
            return false;
        }
    }
    attributes_match(&log.attributes, &filter.attributes)
}

fn series_service(series: &MetricSeries) -> Option<&str> {
    SERVICE_LABELS
        .iter()
        .find_map(|key| series.labels.get(*key))
        .map(String::as_str)
}

#[async_trait]
impl Driver for InMemoryDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn search_traces(&self, query: &Query) -> Result<Vec<TraceResult>, DriverError> {
        self.check(SignalType::Trace)?;
        let traces = self.traces.read().map_err(|_| lock_error())?;

        let mut results: Vec<TraceResult> = traces
            .iter()
            .map(|(trace_id, spans)| {
                TraceResult::new(trace_id.clone(), BackendId::default(), spans.clone())
            })
            .filter(|trace| trace_matches(trace, query))
            .collect();

        // Most recent first
        results.sort_by(|a, b| b.start_time().cmp(&a.start_time()));
        results.truncate(query.limit());
        Ok(results)
    }

    async fn search_logs(&self, query: &Query) -> Result<Vec<LogRecord>, DriverError> {
        self.check(SignalType::Log)?;
        if query.filter().trace_id.is_some() && !self.capabilities.trace_id_filter {
            return Err(DriverError::InvalidQuery(
                "Trace id filtering is not supported by this backend".to_string(),
            ));
        }
        let logs = self.logs.read().map_err(|_| lock_error())?;

        let text = query.filter().text.as_ref().map(|t| t.to_lowercase());
        let mut results: Vec<LogRecord> = logs
            .iter()
            .filter(|log| log_matches(log, query, text.as_deref()))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(query.limit());
        Ok(results)
    }

    async fn query_metrics(&self, query: &Query) -> Result<Vec<MetricSeries>, DriverError> {
        self.check(SignalType::Metric)?;
        let Some(name) = query.filter().metric_name.as_deref() else {
            return Err(DriverError::InvalidQuery(
                "Metric queries require a metric name".to_string(),
            ));
        };
        let metrics = self.metrics.read().map_err(|_| lock_error())?;
        let filter = query.filter();
        let range = query.time_range();
        let filter_by_service = query.service().is_some() || !filter.services.is_empty();

        let mut results: Vec<MetricSeries> = metrics
            .iter()
            .filter(|s| s.name == name)
            .filter(|s| {
                filter
                    .attributes
                    .iter()
                    .all(|(k, v)| s.labels.get(k) == Some(v))
            })
            .filter(|s| {
                !filter_by_service
                    || series_service(s).is_some_and(|svc| query.matches_service(svc))
            })
            .map(|s| {
                let mut s = s.clone();
                s.retain_range(range.start(), range.end());
                s
            })
            .filter(|s| !s.points().is_empty())
            .collect();

        results.sort_by(|a, b| a.labels.cmp(&b.labels));
        results.truncate(query.limit());
        Ok(results)
    }

    async fn service_health(
        &self,
        service: &str,
        window: TimeRange,
    ) -> Result<ServiceHealth, DriverError> {
        self.check(SignalType::Trace)?;
        let traces = self.traces.read().map_err(|_| lock_error())?;

        let spans = traces
            .values()
            .flatten()
            .filter(|s| s.service.eq_ignore_ascii_case(service) && window.contains(s.start_time));
        Ok(ServiceHealth::from_spans(service, window, spans))
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.available.load(Ordering::SeqCst) {
            return HealthStatus::unhealthy("In-memory backend marked unavailable");
        }
        match self.counts() {
            Ok((spans, logs, series)) => HealthStatus::healthy(format!(
                "{spans} spans, {logs} log records, {series} metric series"
            )),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}
