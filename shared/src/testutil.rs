//! Test doubles: a scripted driver and a recording outcome sink.
//!
//! Available to this crate's tests and, through the `testutil` feature, to
//! dependent crates' tests.

use crate::driver::{BackendKind, Capabilities, Driver, DriverError};
use crate::models::{HealthStatus, LogRecord, MetricSeries, Query, TraceResult};
use crate::resilience::{InvocationOutcome, OutcomeSink, QueryOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Outcome sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    invocations: Mutex<Vec<InvocationOutcome>>,
    queries: Mutex<Vec<QueryOutcome>>,
}

impl RecordingSink {
    /// Invocation outcomes recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<InvocationOutcome> {
        self.invocations.lock().clone()
    }

    /// Query outcomes recorded so far.
    #[must_use]
    pub fn queries(&self) -> Vec<QueryOutcome> {
        self.queries.lock().clone()
    }
}

impl OutcomeSink for RecordingSink {
    fn record_invocation(&self, outcome: &InvocationOutcome) {
        self.invocations.lock().push(outcome.clone());
    }

    fn record_query(&self, outcome: &QueryOutcome) {
        self.queries.lock().push(outcome.clone());
    }
}

/// A driver returning canned data after an optional scripted sequence of
/// failures.
///
/// Traces and logs are filtered by the query's trace id when one is set;
/// everything else is returned as configured.
#[derive(Debug)]
pub struct ScriptedDriver {
    kind: BackendKind,
    capabilities: Capabilities,
    traces: Vec<TraceResult>,
    logs: Vec<LogRecord>,
    metrics: Vec<MetricSeries>,
    failures: Mutex<VecDeque<DriverError>>,
    always: Option<DriverError>,
    delay: Duration,
    healthy: bool,
    calls: AtomicU32,
    queries: Mutex<Vec<Query>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    /// A healthy driver offering every signal and returning nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kind: BackendKind::OtelCollector,
            capabilities: Capabilities::all(),
            traces: Vec::new(),
            logs: Vec::new(),
            metrics: Vec::new(),
            failures: Mutex::new(VecDeque::new()),
            always: None,
            delay: Duration::ZERO,
            healthy: true,
            calls: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Canned trace results.
    #[must_use]
    pub fn with_traces(mut self, traces: Vec<TraceResult>) -> Self {
        self.traces = traces;
        self
    }

    /// Canned log records.
    #[must_use]
    pub fn with_logs(mut self, logs: Vec<LogRecord>) -> Self {
        self.logs = logs;
        self
    }

    /// Canned metric series.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<MetricSeries>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fails the next calls with these errors, in order, then succeeds.
    #[must_use]
    pub fn failing_with(self, errors: Vec<DriverError>) -> Self {
        *self.failures.lock() = errors.into();
        self
    }

    /// Fails every call with `error`.
    #[must_use]
    pub fn always_failing(mut self, error: DriverError) -> Self {
        self.always = Some(error);
        self
    }

    /// Waits `delay` before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Overrides the backend family.
    #[must_use]
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Reports unhealthy on health checks.
    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Number of search calls received.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received, in call order.
    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }

    async fn respond<T>(
        &self,
        query: &Query,
        data: impl FnOnce() -> Vec<T>,
    ) -> Result<Vec<T>, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.always {
            return Err(error.clone());
        }
        let scripted = self.failures.lock().pop_front();
        match scripted {
            Some(error) => Err(error),
            None => Ok(data()),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn search_traces(&self, query: &Query) -> Result<Vec<TraceResult>, DriverError> {
        let trace_id = query.filter().trace_id.clone();
        self.respond(query, || {
            self.traces
                .iter()
                .filter(|t| trace_id.as_deref().is_none_or(|id| t.trace_id == id))
                .cloned()
                .collect()
        })
        .await
    }

    async fn search_logs(&self, query: &Query) -> Result<Vec<LogRecord>, DriverError> {
        let trace_id = query.filter().trace_id.clone();
        self.respond(query, || {
            self.logs
                .iter()
                .filter(|r| {
                    trace_id
                        .as_deref()
                        .is_none_or(|id| r.trace_id.as_deref() == Some(id))
                })
                .cloned()
                .collect()
        })
        .await
    }

    async fn query_metrics(&self, query: &Query) -> Result<Vec<MetricSeries>, DriverError> {
        self.respond(query, || self.metrics.clone()).await
    }

    async fn health_check(&self) -> HealthStatus {
        if self.healthy {
            HealthStatus::healthy("scripted")
        } else {
            HealthStatus::unhealthy("scripted failure")
        }
    }
}
