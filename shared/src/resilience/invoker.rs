//! Timeout, retry and concurrency control around driver calls.

use super::backoff::calculate_backoff;
use super::outcome::{InvocationOutcome, OutcomeSink, OutcomeStatus};
use crate::driver::DriverError;
use crate::models::{BackendId, SignalType};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Per-backend invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSettings {
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt, so at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for the exponential delay.
    pub max_delay: Duration,
    /// Opaque backend-specific hints (index names, tenant ids, ...).
    pub hints: BTreeMap<String, String>,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            hints: BTreeMap::new(),
        }
    }
}

/// A classified failure after all permitted attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct InvocationFailure {
    /// The last error observed.
    pub error: DriverError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl InvocationFailure {
    /// Retries performed after the first attempt.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Runs driver calls with per-attempt timeouts, retries and a global
/// concurrency bound.
///
/// Cheap to clone; clones share the semaphore and the outcome sink.
#[derive(Clone)]
pub struct ResilientInvoker {
    permits: Arc<Semaphore>,
    sink: Arc<dyn OutcomeSink>,
}

impl std::fmt::Debug for ResilientInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl ResilientInvoker {
    /// Creates an invoker allowing `max_concurrent` simultaneous attempts.
    ///
    /// A bound of zero is treated as one.
    #[must_use]
    pub fn new(max_concurrent: usize, sink: Arc<dyn OutcomeSink>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sink,
        }
    }

    /// The outcome sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn OutcomeSink> {
        &self.sink
    }

    /// Invokes `call` until it succeeds, fails permanently, runs out of
    /// retries, or the deadline leaves no room for another attempt.
    ///
    /// Each attempt is bounded by `min(settings.timeout, deadline - now)`.
    /// Expired attempts count as [`DriverError::Timeout`]. Backoff sleeps do
    /// not hold a concurrency permit.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationFailure`] with the last error and the number of
    /// attempts made.
    pub async fn invoke<T, F, Fut>(
        &self,
        backend: &BackendId,
        signal: SignalType,
        settings: &InvocationSettings,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, InvocationFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.attempt(settings, deadline, &mut call).await {
                Ok(value) => {
                    self.record(backend, signal, attempts, OutcomeStatus::Success, started);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let exhausted = attempts > settings.max_retries;
            if !error.is_retryable() || exhausted {
                return Err(self.fail(backend, signal, error, attempts, started));
            }

            let delay = calculate_backoff(attempts, settings.base_delay, settings.max_delay);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                tracing::debug!(
                    backend = %backend,
                    attempts,
                    "Deadline leaves no room for another retry"
                );
                return Err(self.fail(backend, signal, error, attempts, started));
            }

            tracing::debug!(
                backend = %backend,
                signal = %signal,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying backend call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        settings: &InvocationSettings,
        deadline: Option<Instant>,
        call: &mut F,
    ) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let now = Instant::now();
        let mut limit = now + settings.timeout;
        if let Some(deadline) = deadline {
            limit = limit.min(deadline);
        }
        let budget = limit.saturating_duration_since(now);

        let permits = &self.permits;
        let guarded = async {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| DriverError::Unavailable("Invoker shut down".to_string()))?;
            call().await
        };

        match tokio::time::timeout_at(limit, guarded).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(format!(
                "no response within {} ms",
                budget.as_millis()
            ))),
        }
    }

    fn fail(
        &self,
        backend: &BackendId,
        signal: SignalType,
        error: DriverError,
        attempts: u32,
        started: Instant,
    ) -> InvocationFailure {
        self.record(
            backend,
            signal,
            attempts,
            OutcomeStatus::Failed { kind: error.kind() },
            started,
        );
        InvocationFailure { error, attempts }
    }

    fn record(
        &self,
        backend: &BackendId,
        signal: SignalType,
        attempts: u32,
        status: OutcomeStatus,
        started: Instant,
    ) {
        self.sink.record_invocation(&InvocationOutcome {
            backend: backend.clone(),
            signal,
            attempts,
            status,
            latency: started.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn settings(max_retries: u32) -> InvocationSettings {
        InvocationSettings {
            timeout: Duration::from_secs(1),
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            hints: BTreeMap::new(),
        }
    }

    fn invoker() -> (ResilientInvoker, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ResilientInvoker::new(8, sink.clone()), sink)
    }

    fn backend() -> BackendId {
        BackendId::from("tempo")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (invoker, sink) = invoker();

        let value = invoker
            .invoke(&backend(), SignalType::Trace, &settings(3), None, || async {
                Ok::<_, DriverError>(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let outcomes = sink.invocations();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(outcomes[0].status, OutcomeStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_unavailable_exhausts_retries() {
        let (invoker, sink) = invoker();
        let calls = AtomicU32::new(0);

        let failure = invoker
            .invoke(&backend(), SignalType::Log, &settings(3), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DriverError::Unavailable("connection refused".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.retries(), 3);
        assert!(matches!(failure.error, DriverError::Unavailable(_)));
        assert_eq!(
            sink.invocations()[0].status,
            OutcomeStatus::Failed {
                kind: "unavailable",
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_query_not_retried() {
        let (invoker, _) = invoker();
        let calls = AtomicU32::new(0);

        let failure = invoker
            .invoke(&backend(), SignalType::Log, &settings(3), None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DriverError::InvalidQuery("bad filter".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let (invoker, _) = invoker();
        let calls = AtomicU32::new(0);

        let value = invoker
            .invoke(&backend(), SignalType::Metric, &settings(3), None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DriverError::Timeout("slow".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_classified_as_timeout() {
        let (invoker, _) = invoker();

        let failure = invoker
            .invoke(&backend(), SignalType::Trace, &settings(1), None, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, DriverError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DriverError::Timeout(_)));
        assert_eq!(failure.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let (invoker, _) = invoker();
        let calls = AtomicU32::new(0);
        let mut s = settings(10);
        s.base_delay = Duration::from_secs(1);
        s.max_delay = Duration::from_secs(10);
        let deadline = Instant::now() + Duration::from_millis(1500);

        let failure = invoker
            .invoke(&backend(), SignalType::Trace, &s, Some(deadline), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DriverError::Unavailable("down".into())) }
            })
            .await
            .unwrap_err();

        // First retry fits (about 1s), the second backoff (about 2s) would not.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(failure.attempts, 2);
        assert!(Instant::now() < deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_attempt() {
        let (invoker, _) = invoker();
        let mut s = settings(0);
        s.timeout = Duration::from_secs(30);
        let start = Instant::now();
        let deadline = start + Duration::from_millis(200);

        let failure = invoker
            .invoke(&backend(), SignalType::Trace, &s, Some(deadline), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DriverError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DriverError::Timeout(_)));
        assert_eq!(
            Instant::now().duration_since(start),
            Duration::from_millis(200)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let sink = Arc::new(RecordingSink::default());
        let invoker = ResilientInvoker::new(2, sink);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let invoker = invoker.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                invoker
                    .invoke(&backend(), SignalType::Trace, &settings(0), None, || {
                        let active = active.clone();
                        let peak = peak.clone();
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, DriverError>(())
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
