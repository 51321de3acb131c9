//! Query orchestration across backends.
//!
//! # Data Flow
//! ```text
//! Query:
//!     → validate
//!     → DriverRegistry::targets (dispatch / skipped / unknown)
//!     → per backend, concurrently: FingerprintCache::get_or_load
//!           → on miss: ResilientInvoker::invoke → Driver
//!     → merge.rs (dedup, order, truncate)
//!     → Orchestrated { data, backends: per-backend reports }
//! ```
//!
//! Every wait is bounded by the request deadline. A backend that misses the
//! deadline is reported as failed; its shared load keeps running and still
//! fills the cache.

pub mod merge;

pub use merge::DedupPolicy;

use crate::cache::{CacheLookup, CacheSource, FingerprintCache, Payload};
use crate::driver::{BackendHandle, Driver, DriverError, DriverRegistry};
use crate::models::{
    BackendId, BackendSelection, LogRecord, MetricSeries, Query, QueryError, ServiceHealth,
    SignalType, TimeRange, TraceResult,
};
use crate::resilience::{InvocationFailure, OutcomeStatus, QueryOutcome, ResilientInvoker};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// The query failed validation.
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    /// No backend could be asked for this signal.
    #[error("No backend available for {signal} queries")]
    NoBackends {
        /// Signal requested.
        signal: SignalType,
        /// Why each backend was left out.
        reports: Vec<BackendReport>,
    },

    /// Every targeted backend failed.
    #[error("All backends failed for {signal} query")]
    AllBackendsFailed {
        /// Signal requested.
        signal: SignalType,
        /// Per-backend failures.
        reports: Vec<BackendReport>,
    },
}

impl OrchestratorError {
    /// Per-backend reports carried by the error, if any.
    #[must_use]
    pub fn reports(&self) -> &[BackendReport] {
        match self {
            Self::InvalidQuery(_) => &[],
            Self::NoBackends { reports, .. } | Self::AllBackendsFailed { reports, .. } => reports,
        }
    }
}

/// How one backend took part in a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendStatus {
    /// The backend answered.
    Ok {
        /// Items it returned (traces, records or series).
        items: usize,
        /// Where the answer came from.
        cache: CacheSource,
    },
    /// The backend was not asked, or declined the signal.
    Skipped {
        /// Why.
        reason: String,
    },
    /// The backend failed.
    Failed {
        /// Error kind, see [`DriverError::kind`].
        kind: &'static str,
        /// Error message.
        message: String,
        /// Attempts made; zero when the request gave up waiting.
        attempts: u32,
    },
}

/// Per-backend annotation attached to every result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendReport {
    /// Backend id.
    pub backend: BackendId,
    /// What happened.
    #[serde(flatten)]
    pub status: BackendStatus,
}

impl BackendReport {
    pub(crate) fn skipped(backend: BackendId, reason: impl Into<String>) -> Self {
        Self {
            backend,
            status: BackendStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    fn failed(backend: BackendId, kind: &'static str, message: String, attempts: u32) -> Self {
        Self {
            backend,
            status: BackendStatus::Failed {
                kind,
                message,
                attempts,
            },
        }
    }

    /// Returns true if the backend answered.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.status, BackendStatus::Ok { .. })
    }

    /// Returns true if the backend failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, BackendStatus::Failed { .. })
    }
}

/// Merged data plus per-backend reports.
#[derive(Debug, Clone, Serialize)]
pub struct Orchestrated<T> {
    /// Merged results.
    pub data: Vec<T>,
    /// One report per backend considered, ordered by backend id.
    pub backends: Vec<BackendReport>,
}

impl<T> Orchestrated<T> {
    /// Reports of failed backends.
    pub fn failures(&self) -> impl Iterator<Item = &BackendReport> {
        self.backends.iter().filter(|r| r.is_failed())
    }

    /// Returns true if some backend failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Health of one service plus how each backend asked took part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealthReport {
    /// Health as reported by the first backend that answered.
    pub health: ServiceHealth,
    /// Backends asked, ordered by backend id.
    pub backends: Vec<BackendReport>,
}

struct Dispatched {
    payloads: Vec<Payload>,
    reports: Vec<BackendReport>,
}

/// Fans queries out to backends through the cache and the resilient
/// invoker, then merges the answers.
#[derive(Debug, Clone)]
pub struct QueryOrchestrator {
    registry: Arc<DriverRegistry>,
    cache: FingerprintCache,
    invoker: ResilientInvoker,
    dedup: DedupPolicy,
}

impl QueryOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        registry: Arc<DriverRegistry>,
        cache: FingerprintCache,
        invoker: ResilientInvoker,
    ) -> Self {
        Self {
            registry,
            cache,
            invoker,
            dedup: DedupPolicy::default(),
        }
    }

    /// Sets the log deduplication policy.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    /// The backend registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// The response cache.
    #[must_use]
    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// The log deduplication policy.
    #[must_use]
    pub fn dedup(&self) -> DedupPolicy {
        self.dedup
    }

    /// Searches traces on every targeted backend.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorError`].
    pub async fn search_traces(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<Orchestrated<TraceResult>, OrchestratorError> {
        ensure_signal(query, SignalType::Trace)?;
        let Dispatched { payloads, reports } = self.dispatch(query, deadline).await?;

        let traces = payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Traces(t) => Some(t.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        Ok(Orchestrated {
            data: merge::merge_traces(traces, query.limit()),
            backends: reports,
        })
    }

    /// Searches logs on every targeted backend.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorError`].
    pub async fn search_logs(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<Orchestrated<LogRecord>, OrchestratorError> {
        ensure_signal(query, SignalType::Log)?;
        let Dispatched { payloads, reports } = self.dispatch(query, deadline).await?;

        let records = payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Logs(l) => Some(l.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        Ok(Orchestrated {
            data: merge::merge_logs(records, query.limit(), self.dedup),
            backends: reports,
        })
    }

    /// Queries metrics on every targeted backend.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorError`].
    pub async fn query_metrics(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<Orchestrated<MetricSeries>, OrchestratorError> {
        ensure_signal(query, SignalType::Metric)?;
        let Dispatched { payloads, reports } = self.dispatch(query, deadline).await?;

        let series = payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Metrics(m) => Some(m.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        Ok(Orchestrated {
            data: merge::merge_metrics(series),
            backends: reports,
        })
    }

    /// Reports the health of `service` over `window`.
    ///
    /// Enabled trace backends are asked one at a time in id order, each under
    /// its own retry settings and the request deadline; the first answer
    /// wins and later backends are not asked. Health is live data and is
    /// never cached.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidQuery`] for a blank service name,
    /// [`OrchestratorError::NoBackends`] if no backend offers traces or
    /// service health, and [`OrchestratorError::AllBackendsFailed`] if every
    /// backend asked failed.
    pub async fn service_health(
        &self,
        service: &str,
        window: TimeRange,
        deadline: Instant,
    ) -> Result<ServiceHealthReport, OrchestratorError> {
        let service = service.trim();
        if service.is_empty() {
            return Err(QueryError::EmptyFilter("service").into());
        }
        let signal = SignalType::Trace;
        let targets = self
            .registry
            .targets_for(signal, &BackendSelection::AllEnabled);

        let mut reports: Vec<BackendReport> = targets
            .skipped
            .into_iter()
            .map(|(backend, reason)| BackendReport::skipped(backend, reason))
            .collect();
        let mut answer = None;

        for handle in &targets.dispatch {
            let started = Instant::now();
            let driver: &dyn Driver = handle.driver.as_ref();
            let result = self
                .invoker
                .invoke(&handle.id, signal, &handle.settings, Some(deadline), move || {
                    driver.service_health(service, window)
                })
                .await;
            let latency = started.elapsed();
            let backend = handle.id.clone();

            match result {
                Ok(mut health) => {
                    let cache = Some(CacheSource::Bypass);
                    self.record(&backend, signal, cache, OutcomeStatus::Success, latency);
                    health.backend = backend.clone();
                    reports.push(BackendReport {
                        backend,
                        status: BackendStatus::Ok {
                            items: 1,
                            cache: CacheSource::Bypass,
                        },
                    });
                    answer = Some(health);
                    break;
                }
                Err(InvocationFailure {
                    error: DriverError::Unsupported(_),
                    ..
                }) => {
                    self.record(&backend, signal, None, OutcomeStatus::Skipped, latency);
                    reports.push(BackendReport::skipped(
                        backend,
                        "service health not supported by backend",
                    ));
                }
                Err(failure) => {
                    let kind = failure.error.kind();
                    tracing::warn!(
                        backend = %backend,
                        service,
                        error = %failure.error,
                        "Service health lookup failed; trying next backend"
                    );
                    self.record(
                        &backend,
                        signal,
                        None,
                        OutcomeStatus::Failed { kind },
                        latency,
                    );
                    reports.push(BackendReport::failed(
                        backend,
                        kind,
                        failure.error.to_string(),
                        failure.attempts,
                    ));
                }
            }
        }
        reports.sort_by(|a, b| a.backend.cmp(&b.backend));

        match answer {
            Some(health) => {
                tracing::debug!(
                    service,
                    backend = %health.backend,
                    status = %health.status,
                    "Resolved service health"
                );
                Ok(ServiceHealthReport {
                    health,
                    backends: reports,
                })
            }
            None if reports.iter().any(BackendReport::is_failed) => {
                Err(OrchestratorError::AllBackendsFailed { signal, reports })
            }
            None => Err(OrchestratorError::NoBackends { signal, reports }),
        }
    }

    async fn dispatch(
        &self,
        query: &Query,
        deadline: Instant,
    ) -> Result<Dispatched, OrchestratorError> {
        query.validate()?;
        let signal = query.signal();
        let targets = self.registry.targets(query);
        let mut reports = Vec::with_capacity(
            targets.dispatch.len() + targets.skipped.len() + targets.unknown.len(),
        );

        for (backend, reason) in targets.skipped {
            self.record(
                &backend,
                signal,
                None,
                OutcomeStatus::Skipped,
                Duration::ZERO,
            );
            reports.push(BackendReport::skipped(backend, reason));
        }
        for backend in targets.unknown {
            self.record(
                &backend,
                signal,
                None,
                OutcomeStatus::Failed {
                    kind: "unknown_backend",
                },
                Duration::ZERO,
            );
            reports.push(BackendReport::failed(
                backend,
                "unknown_backend",
                "unknown backend".to_string(),
                0,
            ));
        }

        if targets.dispatch.is_empty() {
            reports.sort_by(|a, b| a.backend.cmp(&b.backend));
            tracing::warn!(signal = %signal, "No backend available for query");
            return Err(OrchestratorError::NoBackends { signal, reports });
        }

        tracing::debug!(
            signal = %signal,
            backends = targets.dispatch.len(),
            limit = query.limit(),
            "Dispatching query"
        );

        let calls = targets
            .dispatch
            .iter()
            .map(|handle| self.call_backend(handle, query, deadline));
        let results = join_all(calls).await;

        let mut payloads = Vec::with_capacity(results.len());
        for (handle, (result, latency)) in targets.dispatch.iter().zip(results) {
            let backend = handle.id.clone();
            match result {
                Ok(CacheLookup { payload, source }) => {
                    self.record(
                        &backend,
                        signal,
                        Some(source),
                        OutcomeStatus::Success,
                        latency,
                    );
                    reports.push(BackendReport {
                        backend,
                        status: BackendStatus::Ok {
                            items: payload.len(),
                            cache: source,
                        },
                    });
                    payloads.push(payload);
                }
                Err(InvocationFailure {
                    error: DriverError::Unsupported(_),
                    ..
                }) => {
                    self.record(&backend, signal, None, OutcomeStatus::Skipped, latency);
                    reports.push(BackendReport::skipped(
                        backend,
                        format!("{signal} signal not supported by backend"),
                    ));
                }
                Err(failure) => {
                    let kind = failure.error.kind();
                    self.record(
                        &backend,
                        signal,
                        None,
                        OutcomeStatus::Failed { kind },
                        latency,
                    );
                    reports.push(BackendReport::failed(
                        backend,
                        kind,
                        failure.error.to_string(),
                        failure.attempts,
                    ));
                }
            }
        }
        reports.sort_by(|a, b| a.backend.cmp(&b.backend));

        if payloads.is_empty() {
            return Err(if reports.iter().any(BackendReport::is_failed) {
                tracing::warn!(signal = %signal, "All backends failed");
                OrchestratorError::AllBackendsFailed { signal, reports }
            } else {
                OrchestratorError::NoBackends { signal, reports }
            });
        }
        if reports.iter().any(BackendReport::is_failed) {
            tracing::info!(
                signal = %signal,
                answered = payloads.len(),
                "Returning partial result"
            );
        }
        Ok(Dispatched { payloads, reports })
    }

    async fn call_backend(
        &self,
        handle: &BackendHandle,
        query: &Query,
        deadline: Instant,
    ) -> (Result<CacheLookup, InvocationFailure>, Duration) {
        let started = Instant::now();
        let loader = self.loader(handle, query, deadline);
        let load = self.cache.get_or_load(query, &handle.id, loader);
        let result = tokio::time::timeout_at(deadline, load)
            .await
            .unwrap_or_else(|_| {
                tracing::debug!(backend = %handle.id, "Request deadline passed while waiting");
                Err(InvocationFailure {
                    error: DriverError::Timeout("request deadline exceeded".to_string()),
                    attempts: 0,
                })
            });
        (result, started.elapsed())
    }

    /// Builds the load for one backend.
    ///
    /// A cached load is shared with other requests and must outlive this one,
    /// so it runs under the backend's own timeout and retry settings only.
    /// With caching disabled nobody else waits on the load and the request
    /// deadline also bounds retries.
    fn loader(
        &self,
        handle: &BackendHandle,
        query: &Query,
        deadline: Instant,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Payload, InvocationFailure>> {
        let invoker = self.invoker.clone();
        let driver = Arc::clone(&handle.driver);
        let backend = handle.id.clone();
        let settings = handle.settings.clone();
        let query = query.clone();
        let deadline = (!self.cache.is_enabled()).then_some(deadline);

        move || {
            async move {
                let driver: &dyn Driver = driver.as_ref();
                let (query, backend) = (&query, &backend);
                invoker
                    .invoke(backend, query.signal(), &settings, deadline, move || {
                        fetch(driver, query, backend)
                    })
                    .await
            }
            .boxed()
        }
    }

    fn record(
        &self,
        backend: &BackendId,
        signal: SignalType,
        cache: Option<CacheSource>,
        status: OutcomeStatus,
        latency: Duration,
    ) {
        self.invoker.sink().record_query(&QueryOutcome {
            backend: backend.clone(),
            signal,
            cache,
            status,
            latency,
        });
    }
}

fn ensure_signal(query: &Query, expected: SignalType) -> Result<(), OrchestratorError> {
    if query.signal() == expected {
        Ok(())
    } else {
        Err(QueryError::SignalMismatch {
            expected,
            actual: query.signal(),
        }
        .into())
    }
}

/// Runs one driver call and stamps the backend id on every item.
async fn fetch(
    driver: &dyn Driver,
    query: &Query,
    backend: &BackendId,
) -> Result<Payload, DriverError> {
    Ok(match query.signal() {
        SignalType::Trace => {
            let mut traces = driver.search_traces(query).await?;
            for trace in &mut traces {
                trace.backend = backend.clone();
            }
            Payload::Traces(Arc::new(traces))
        }
        SignalType::Log => {
            let mut records = driver.search_logs(query).await?;
            for record in &mut records {
                record.backend = backend.clone();
            }
            Payload::Logs(Arc::new(records))
        }
        SignalType::Metric => {
            let mut series = driver.query_metrics(query).await?;
            for s in &mut series {
                s.backend = backend.clone();
            }
            Payload::Metrics(Arc::new(series))
        }
    })
}
