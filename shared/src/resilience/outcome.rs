//! Structured outcome records.
//!
//! Every backend invocation and every per-backend query result is reported to
//! an [`OutcomeSink`]. The default [`TracingSink`] turns them into `tracing`
//! events; embedders can plug in metrics exporters instead.

use crate::cache::CacheSource;
use crate::models::{BackendId, SignalType};
use std::time::Duration;

/// How an invocation or query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Data was returned.
    Success,
    /// The backend was not asked (or declined the signal).
    Skipped,
    /// The call failed; `kind` is the driver error kind.
    Failed {
        /// Error kind, see [`crate::driver::DriverError::kind`].
        kind: &'static str,
    },
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed { kind } => write!(f, "failed:{kind}"),
        }
    }
}

/// One resilient invocation of a driver call, covering all its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Backend called.
    pub backend: BackendId,
    /// Signal requested.
    pub signal: SignalType,
    /// Number of attempts made.
    pub attempts: u32,
    /// Final status.
    pub status: OutcomeStatus,
    /// Wall time from first attempt to final result.
    pub latency: Duration,
}

/// The result of one backend's share of an orchestrated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Backend targeted.
    pub backend: BackendId,
    /// Signal requested.
    pub signal: SignalType,
    /// Where the data came from, if any was returned.
    pub cache: Option<CacheSource>,
    /// Final status.
    pub status: OutcomeStatus,
    /// Time the caller waited for this backend.
    pub latency: Duration,
}

/// Receiver of outcome records.
pub trait OutcomeSink: Send + Sync {
    /// Records one resilient invocation.
    fn record_invocation(&self, outcome: &InvocationOutcome);

    /// Records one backend's part of a query.
    fn record_query(&self, outcome: &QueryOutcome);
}

/// Writes outcomes as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record_invocation(&self, outcome: &InvocationOutcome) {
        let latency_ms = u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX);
        match outcome.status {
            OutcomeStatus::Failed { kind } => tracing::warn!(
                backend = %outcome.backend,
                signal = %outcome.signal,
                attempts = outcome.attempts,
                error_kind = kind,
                latency_ms,
                "Backend invocation failed"
            ),
            OutcomeStatus::Success | OutcomeStatus::Skipped => tracing::debug!(
                backend = %outcome.backend,
                signal = %outcome.signal,
                attempts = outcome.attempts,
                status = %outcome.status,
                latency_ms,
                "Backend invocation completed"
            ),
        }
    }

    fn record_query(&self, outcome: &QueryOutcome) {
        let latency_ms = u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            backend = %outcome.backend,
            signal = %outcome.signal,
            cache = outcome.cache.map(CacheSource::as_str),
            status = %outcome.status,
            latency_ms,
            "Backend query finished"
        );
    }
}
