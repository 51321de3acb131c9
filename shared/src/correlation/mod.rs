//! Cross-signal correlation.
//!
//! Given a trace, finds the log records (and optionally metric series) that
//! belong to it, even on backends that cannot filter logs by trace id.
//!
//! # Data Flow
//! ```text
//! CorrelationRequest:
//!     → trace lookup by id (orchestrator, every trace backend, spans merged)
//!     → CorrelationWindow (observed span of the trace, padded)
//!     → log backends split in two groups, queried concurrently:
//!           trace-id capable: trace_id = X           within the window
//!           others:           service in {services}  within the window
//!     → classify: Exact (trace id matches) before Fallback (window + service)
//!     → optional metric queries over the window, per metric name
//! ```
//!
//! Log and metric failures never fail the correlation; they become warnings
//! next to a possibly empty result.

use crate::config::CorrelationConfig;
use crate::models::query::MAX_LIMIT;
use crate::models::{
    BackendSelection, LogRecord, MetricSeries, Query, QueryError, SignalType, TimeRange,
    TraceResult,
};
use crate::orchestrator::merge::{self, DedupPolicy};
use crate::orchestrator::{BackendReport, Orchestrated, OrchestratorError, QueryOrchestrator};
use chrono::Duration;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by the correlation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    /// No trace backend returned spans for the trace id.
    #[error("Trace '{0}' not found")]
    TraceNotFound(String),

    /// The trace has no spans to derive a window from.
    #[error("Trace '{0}' has no spans")]
    EmptyTrace(String),

    /// The padded window leaves the representable time range.
    #[error("Invalid correlation window: {0}")]
    InvalidWindow(#[from] QueryError),

    /// The trace lookup itself failed.
    #[error("Trace lookup failed: {0}")]
    Lookup(#[from] OrchestratorError),
}

/// How a log record was tied to the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The record carries the trace id.
    Exact,
    /// The record falls in the window and comes from one of the trace's
    /// services.
    Fallback,
}

/// A log record tied to a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelatedLog {
    /// The record.
    #[serde(flatten)]
    pub record: LogRecord,
    /// How it matched.
    pub match_kind: MatchKind,
}

/// Time window derived from a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorrelationWindow {
    /// Earliest span start to latest span end.
    pub observed: TimeRange,
    /// `observed` padded on both ends.
    pub window: TimeRange,
    /// Padding applied, in milliseconds.
    pub pad_ms: i64,
}

impl CorrelationWindow {
    /// Pads an observed range on both ends.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, TimeZone, Utc};
    /// use shared::correlation::CorrelationWindow;
    /// use shared::models::TimeRange;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
    /// let observed = TimeRange::new(start, start + Duration::seconds(2)).unwrap();
    /// let window = CorrelationWindow::around(observed, Duration::seconds(5)).unwrap();
    ///
    /// assert_eq!(window.window.start(), start - Duration::seconds(5));
    /// assert_eq!(window.window.end(), start + Duration::seconds(7));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TimeOutOfRange`] if the padded window leaves
    /// the representable calendar range.
    pub fn around(observed: TimeRange, pad: Duration) -> Result<Self, QueryError> {
        Ok(Self {
            observed,
            window: observed.pad(pad)?,
            pad_ms: pad.num_milliseconds().max(0),
        })
    }

    /// The window of a trace.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::EmptyTrace`] if the trace has no spans,
    /// or [`CorrelationError::InvalidWindow`] if padding overflows.
    pub fn for_trace(trace: &TraceResult, pad: Duration) -> Result<Self, CorrelationError> {
        let observed = trace
            .observed_range()
            .ok_or_else(|| CorrelationError::EmptyTrace(trace.trace_id.clone()))?;
        Ok(Self::around(observed, pad)?)
    }
}

/// Tuning for one correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationOptions {
    /// Window padding; the configured default when unset.
    pub pad: Option<Duration>,
    /// Metric names to correlate over the window.
    pub metric_names: Vec<String>,
    /// Maximum correlated log records; the configured default when unset.
    pub log_limit: Option<usize>,
}

/// A correlation by trace id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationRequest {
    /// Trace to correlate.
    pub trace_id: String,
    /// Range searched to locate the trace.
    pub search_range: TimeRange,
    /// Tuning.
    pub options: CorrelationOptions,
}

impl CorrelationRequest {
    /// Creates a request with default options.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, search_range: TimeRange) -> Self {
        Self {
            trace_id: trace_id.into(),
            search_range,
            options: CorrelationOptions::default(),
        }
    }

    /// Sets the window padding.
    #[must_use]
    pub fn with_pad(mut self, pad: Duration) -> Self {
        self.options.pad = Some(pad);
        self
    }

    /// Adds a metric to correlate.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>) -> Self {
        self.options.metric_names.push(name.into());
        self
    }

    /// Caps the correlated log records.
    #[must_use]
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.options.log_limit = Some(limit);
        self
    }
}

/// Per-stage backend reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationReports {
    /// Trace lookup.
    pub trace: Vec<BackendReport>,
    /// Log searches, both groups.
    pub logs: Vec<BackendReport>,
    /// Metric queries, keyed by metric name.
    pub metrics: BTreeMap<String, Vec<BackendReport>>,
}

/// Everything correlated with one trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    /// The trace, spans merged across backends.
    pub trace: TraceResult,
    /// Window used for the log and metric queries.
    pub window: CorrelationWindow,
    /// Correlated log records: exact matches first, each rank ordered by
    /// timestamp ascending.
    pub logs: Vec<CorrelatedLog>,
    /// Correlated metric series.
    pub metrics: Vec<MetricSeries>,
    /// Problems that left the result incomplete.
    pub warnings: Vec<String>,
    /// Per-backend reports.
    pub backends: CorrelationReports,
}

impl CorrelationResult {
    /// Number of exact matches.
    #[must_use]
    pub fn exact_matches(&self) -> usize {
        self.logs
            .iter()
            .filter(|l| l.match_kind == MatchKind::Exact)
            .count()
    }
}

struct LogStage {
    logs: Vec<CorrelatedLog>,
    reports: Vec<BackendReport>,
    warnings: Vec<String>,
}

struct MetricStage {
    series: Vec<MetricSeries>,
    reports: BTreeMap<String, Vec<BackendReport>>,
    warnings: Vec<String>,
}

/// Joins traces with logs and metrics from any backend.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    orchestrator: QueryOrchestrator,
    default_pad: Duration,
    log_limit: usize,
    dedup: DedupPolicy,
}

impl CorrelationEngine {
    /// Creates an engine issuing its queries through `orchestrator`.
    #[must_use]
    pub fn new(orchestrator: QueryOrchestrator, config: &CorrelationConfig) -> Self {
        Self {
            orchestrator,
            default_pad: config.default_pad(),
            log_limit: config.log_limit,
            dedup: DedupPolicy {
                cross_backend: config.cross_backend_dedup,
            },
        }
    }

    /// Locates a trace by id and correlates it.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::TraceNotFound`] if no trace backend knows
    /// the id, or [`CorrelationError::Lookup`] if the trace search itself
    /// failed.
    pub async fn correlate(
        &self,
        request: &CorrelationRequest,
        deadline: Instant,
    ) -> Result<CorrelationResult, CorrelationError> {
        let trace_id = request.trace_id.trim();
        let lookup = Query::traces(request.search_range)
            .with_trace_id(trace_id)
            .with_limit(MAX_LIMIT);
        let found = self.orchestrator.search_traces(&lookup, deadline).await?;

        let trace = merge::combine_trace(trace_id, found.data)
            .ok_or_else(|| CorrelationError::TraceNotFound(trace_id.to_string()))?;
        tracing::debug!(
            trace_id,
            spans = trace.span_count(),
            "Located trace for correlation"
        );

        let mut result = self
            .correlate_trace(&trace, &request.options, deadline)
            .await?;
        result.backends.trace = found.backends;
        Ok(result)
    }

    /// Correlates an already known trace.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::EmptyTrace`] if the trace has no spans,
    /// or [`CorrelationError::InvalidWindow`] if `pad` pushes the window out
    /// of the representable time range.
    pub async fn correlate_trace(
        &self,
        trace: &TraceResult,
        options: &CorrelationOptions,
        deadline: Instant,
    ) -> Result<CorrelationResult, CorrelationError> {
        let pad = options.pad.unwrap_or(self.default_pad);
        let window = CorrelationWindow::for_trace(trace, pad)?;
        let services: BTreeSet<String> = trace.services().into_iter().map(str::to_string).collect();
        let limit = options
            .log_limit
            .unwrap_or(self.log_limit)
            .clamp(1, MAX_LIMIT);

        let (log_stage, metric_stage) = tokio::join!(
            self.correlate_logs(&trace.trace_id, &window, &services, limit, deadline),
            self.correlate_metrics(&options.metric_names, &window, &services, deadline),
        );

        let mut warnings = log_stage.warnings;
        warnings.extend(metric_stage.warnings);

        let result = CorrelationResult {
            trace: trace.clone(),
            window,
            logs: log_stage.logs,
            metrics: metric_stage.series,
            warnings,
            backends: CorrelationReports {
                trace: Vec::new(),
                logs: log_stage.reports,
                metrics: metric_stage.reports,
            },
        };

        tracing::info!(
            trace_id = %trace.trace_id,
            logs = result.logs.len(),
            exact = result.exact_matches(),
            metrics = result.metrics.len(),
            warnings = result.warnings.len(),
            "Correlated trace"
        );
        Ok(result)
    }

    async fn correlate_logs(
        &self,
        trace_id: &str,
        window: &CorrelationWindow,
        services: &BTreeSet<String>,
        limit: usize,
        deadline: Instant,
    ) -> LogStage {
        let targets = self
            .orchestrator
            .registry()
            .targets_for(SignalType::Log, &BackendSelection::AllEnabled);

        let mut reports: Vec<BackendReport> = targets
            .skipped
            .into_iter()
            .map(|(backend, reason)| BackendReport::skipped(backend, reason))
            .collect();
        let mut warnings = Vec::new();

        if targets.dispatch.is_empty() {
            warnings.push("No backend offers logs; correlated logs are empty".to_string());
            return LogStage {
                logs: Vec::new(),
                reports,
                warnings,
            };
        }

        let (by_id, by_service): (Vec<_>, Vec<_>) = targets
            .dispatch
            .iter()
            .partition(|h| h.capabilities().trace_id_filter);
        let group = |handles: &[&crate::driver::BackendHandle]| {
            BackendSelection::only(handles.iter().map(|h| h.id.clone()))
        };

        let id_query = (!by_id.is_empty()).then(|| {
            Query::logs(window.window)
                .with_trace_id(trace_id)
                .with_limit(limit)
                .with_backends(group(&by_id))
        });
        let service_query = (!by_service.is_empty()).then(|| {
            Query::logs(window.window)
                .with_services(services.iter().cloned())
                .with_limit(limit)
                .with_backends(group(&by_service))
        });

        let (by_id, by_service) = tokio::join!(
            self.search_group(id_query, deadline),
            self.search_group(service_query, deadline),
        );

        let mut records = Vec::new();
        let mut answered = false;
        for (label, outcome) in [("trace id", by_id), ("service", by_service)] {
            match outcome {
                Some(Ok(Orchestrated { data, backends })) => {
                    answered = true;
                    records.extend(data);
                    reports.extend(backends);
                }
                Some(Err(error)) => {
                    reports.extend(error.reports().iter().cloned());
                    warnings.push(format!("Log search by {label} failed: {error}"));
                }
                None => {}
            }
        }
        if !answered {
            warnings.push("No log backend answered; correlated logs are empty".to_string());
        }
        reports.sort_by(|a, b| a.backend.cmp(&b.backend));

        let mut logs: Vec<CorrelatedLog> = merge::dedup_logs(records, self.dedup)
            .into_iter()
            .filter_map(|record| {
                classify(&record, trace_id, window, services).map(|match_kind| CorrelatedLog {
                    record,
                    match_kind,
                })
            })
            .collect();
        logs.sort_by(|a, b| {
            a.match_kind
                .cmp(&b.match_kind)
                .then_with(|| a.record.timestamp.cmp(&b.record.timestamp))
                .then_with(|| a.record.backend.cmp(&b.record.backend))
        });
        logs.truncate(limit);

        LogStage {
            logs,
            reports,
            warnings,
        }
    }

    async fn search_group(
        &self,
        query: Option<Query>,
        deadline: Instant,
    ) -> Option<Result<Orchestrated<LogRecord>, OrchestratorError>> {
        match query {
            Some(query) => Some(self.orchestrator.search_logs(&query, deadline).await),
            None => None,
        }
    }

    async fn correlate_metrics(
        &self,
        names: &[String],
        window: &CorrelationWindow,
        services: &BTreeSet<String>,
        deadline: Instant,
    ) -> MetricStage {
        let names: BTreeSet<&str> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();

        let queries = names.iter().map(|name| async move {
            let query =
                Query::metrics(*name, window.window).with_services(services.iter().cloned());
            (*name, self.orchestrator.query_metrics(&query, deadline).await)
        });

        let mut stage = MetricStage {
            series: Vec::new(),
            reports: BTreeMap::new(),
            warnings: Vec::new(),
        };
        for (name, outcome) in join_all(queries).await {
            match outcome {
                Ok(Orchestrated { data, backends }) => {
                    stage.series.extend(data);
                    stage.reports.insert(name.to_string(), backends);
                }
                Err(error) => {
                    stage
                        .reports
                        .insert(name.to_string(), error.reports().to_vec());
                    stage
                        .warnings
                        .push(format!("Metric query for '{name}' failed: {error}"));
                }
            }
        }
        stage.series = merge::merge_metrics(stage.series);
        stage
    }
}

/// Exact when the record carries the trace id; fallback when it lies in the
/// window and comes from one of the trace's services.
fn classify(
    record: &LogRecord,
    trace_id: &str,
    window: &CorrelationWindow,
    services: &BTreeSet<String>,
) -> Option<MatchKind> {
    if record.trace_id.as_deref() == Some(trace_id) {
        return Some(MatchKind::Exact);
    }
    let in_window = window.window.contains(record.timestamp);
    let same_service = services
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&record.service));
    (in_window && same_service).then_some(MatchKind::Fallback)
}
