//! Single-flight fingerprint cache.

use super::fingerprint::Fingerprint;
use super::lru::{Insert, Lookup, LruIndex};
use crate::config::CacheConfig;
use crate::driver::DriverError;
use crate::models::{BackendId, LogRecord, MetricSeries, Query, SignalType, TraceResult};
use crate::resilience::InvocationFailure;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A normalized result set, shared immutably between the cache and callers.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Trace search results.
    Traces(Arc<Vec<TraceResult>>),
    /// Log search results.
    Logs(Arc<Vec<LogRecord>>),
    /// Metric query results.
    Metrics(Arc<Vec<MetricSeries>>),
}

impl Payload {
    /// Signal type of the payload.
    #[must_use]
    pub fn signal(&self) -> SignalType {
        match self {
            Self::Traces(_) => SignalType::Trace,
            Self::Logs(_) => SignalType::Log,
            Self::Metrics(_) => SignalType::Metric,
        }
    }

    /// Number of top-level items (traces, records or series).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Traces(v) => v.len(),
            Self::Logs(v) => v.len(),
            Self::Metrics(v) => v.len(),
        }
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size weight used for the cache's weight bound: one unit per span,
    /// log record or metric point, plus one for the entry itself.
    #[must_use]
    pub fn weight(&self) -> usize {
        let items = match self {
            Self::Traces(v) => v.iter().map(TraceResult::span_count).sum(),
            Self::Logs(v) => v.len(),
            Self::Metrics(v) => v.iter().map(|s| s.points().len()).sum(),
        };
        items + 1
    }
}

/// One cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key of the entry.
    pub fingerprint: Fingerprint,
    /// The cached result.
    pub payload: Payload,
    /// When the entry was stored.
    pub inserted_at: Instant,
    /// TTL class.
    pub signal: SignalType,
    /// Backend the result came from.
    pub backend: BackendId,
    /// Size weight.
    pub weight: usize,
}

/// Where a [`CacheLookup`] payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// A live cached entry.
    Hit,
    /// This caller started the load.
    Loaded,
    /// This caller shared a load started by another caller.
    Joined,
    /// Caching is disabled; the loader ran directly.
    Bypass,
}

impl CacheSource {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Loaded => "loaded",
            Self::Joined => "joined",
            Self::Bypass => "bypass",
        }
    }
}

/// Result of [`FingerprintCache::get_or_load`].
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// The payload.
    pub payload: Payload,
    /// Where it came from.
    pub source: CacheSource,
}

/// Effective cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// When false every lookup bypasses the cache.
    pub enabled: bool,
    /// Entry count bound.
    pub max_entries: usize,
    /// Optional total weight bound.
    pub max_weight: Option<usize>,
    /// TTL for trace results.
    pub trace_ttl: Duration,
    /// TTL for log results.
    pub log_ttl: Duration,
    /// TTL for metric results.
    pub metric_ttl: Duration,
}

impl CacheSettings {
    /// TTL for a signal type.
    #[must_use]
    pub fn ttl_for(&self, signal: SignalType) -> Duration {
        match signal {
            SignalType::Trace => self.trace_ttl,
            SignalType::Log => self.log_ttl,
            SignalType::Metric => self.metric_ttl,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_entries: config.max_entries,
            max_weight: config.max_weight,
            trace_ttl: config.ttl.traces(),
            log_ttl: config.ttl.logs(),
            metric_ttl: config.ttl.metrics(),
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Whether the cache is enabled.
    pub enabled: bool,
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that started a load.
    pub misses: u64,
    /// Lookups that joined a load already in flight.
    pub joined: u64,
    /// Loads that failed (never cached).
    pub load_failures: u64,
    /// Entries evicted by the LRU bounds.
    pub evictions: u64,
    /// Entries found expired on access.
    pub expirations: u64,
    /// Entries removed by invalidation or clearing.
    pub invalidations: u64,
    /// Current entry count.
    pub entries: usize,
    /// Current total weight.
    pub weight: usize,
    /// `(hits + joined) / (hits + joined + misses)`, 0 when there were no lookups.
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

type LoadResult = Result<Payload, InvocationFailure>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Invalidation state a load was started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    epoch: u64,
    backend: u64,
}

/// LRU entries and invalidation generations, guarded by one lock so that a
/// finished load checks its generation and inserts in a single critical
/// section.
struct Index {
    lru: LruIndex<Fingerprint, CacheEntry>,
    /// Bumped by `clear`.
    epoch: u64,
    /// Bumped by `invalidate`, per backend.
    generations: HashMap<BackendId, u64>,
}

impl Index {
    fn generation(&self, backend: &BackendId) -> Generation {
        Generation {
            epoch: self.epoch,
            backend: self.generations.get(backend).copied().unwrap_or(0),
        }
    }
}

struct Inner {
    settings: CacheSettings,
    index: Mutex<Index>,
    inflight: DashMap<Fingerprint, SharedLoad>,
    counters: Counters,
}

impl Inner {
    fn lookup(&self, fp: &Fingerprint) -> Option<Payload> {
        let result = self.index.lock().lru.get(fp, Instant::now());
        match result {
            Lookup::Hit(entry) => Some(entry.payload),
            Lookup::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %fp.short(), "Cache entry expired");
                None
            }
            Lookup::Miss => None,
        }
    }

    fn store(&self, fp: Fingerprint, backend: BackendId, payload: Payload, started: Generation) {
        let signal = payload.signal();
        let weight = payload.weight();
        let now = Instant::now();
        let entry = CacheEntry {
            fingerprint: fp.clone(),
            payload,
            inserted_at: now,
            signal,
            backend: backend.clone(),
            weight,
        };
        let ttl = self.settings.ttl_for(signal);

        let outcome = {
            let mut index = self.index.lock();
            if index.generation(&backend) != started {
                None
            } else {
                Some(index.lru.insert(fp.clone(), entry, weight, now + ttl))
            }
        };
        let Some(outcome) = outcome else {
            tracing::debug!(
                backend = %backend,
                fingerprint = %fp.short(),
                "Cache invalidated during load; result not stored"
            );
            return;
        };
        match outcome {
            Insert::Stored { evicted } => {
                if !evicted.is_empty() {
                    self.counters
                        .evictions
                        .fetch_add(evicted.len() as u64, Ordering::Relaxed);
                    tracing::debug!(
                        evicted = evicted.len(),
                        "Evicted least recently used entries"
                    );
                }
                tracing::debug!(
                    backend = %backend,
                    fingerprint = %fp.short(),
                    signal = %signal,
                    weight,
                    "Cached result"
                );
            }
            Insert::TooHeavy => tracing::debug!(
                backend = %backend,
                fingerprint = %fp.short(),
                weight,
                "Result exceeds cache weight bound; not cached"
            ),
        }
    }
}

/// Cache of normalized backend results keyed by query fingerprint.
///
/// Concurrent requests for the same fingerprint share one load. The load runs
/// on its own task, so a caller that stops waiting (for example because its
/// deadline passed) does not cancel it; the result still reaches the other
/// waiters and the cache.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FingerprintCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("settings", &self.inner.settings)
            .field("inflight", &self.inner.inflight.len())
            .finish_non_exhaustive()
    }
}

impl FingerprintCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        let index = Index {
            lru: LruIndex::new(settings.max_entries, settings.max_weight),
            epoch: 0,
            generations: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                index: Mutex::new(index),
                inflight: DashMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// The settings in effect.
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Whether caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.settings.enabled
    }

    /// Returns the cached payload for `query` on `backend`, loading it with
    /// `loader` on a miss.
    ///
    /// At most one load runs per fingerprint at a time; concurrent callers
    /// join it. Failed loads are not cached.
    ///
    /// # Errors
    ///
    /// Returns the loader's [`InvocationFailure`].
    pub async fn get_or_load<F, Fut>(
        &self,
        query: &Query,
        backend: &BackendId,
        loader: F,
    ) -> Result<CacheLookup, InvocationFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult> + Send + 'static,
    {
        if !self.inner.settings.enabled {
            let payload = loader().await?;
            return Ok(CacheLookup {
                payload,
                source: CacheSource::Bypass,
            });
        }

        let fp = Fingerprint::compute(query, backend);
        if let Some(payload) = self.inner.lookup(&fp) {
            return Ok(self.hit(&fp, backend, payload));
        }

        let (load, source) = match self.inner.inflight.entry(fp.clone()) {
            Entry::Occupied(existing) => {
                self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    backend = %backend,
                    fingerprint = %fp.short(),
                    "Joining in-flight load"
                );
                (existing.get().clone(), CacheSource::Joined)
            }
            Entry::Vacant(slot) => {
                // A load may have finished between the lookup above and
                // taking the shard lock.
                if let Some(payload) = self.inner.lookup(&fp) {
                    drop(slot);
                    return Ok(self.hit(&fp, backend, payload));
                }
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    backend = %backend,
                    fingerprint = %fp.short(),
                    "Cache miss; starting load"
                );
                let load = self.spawn_load(fp.clone(), backend.clone(), loader());
                slot.insert(load.clone());
                (load, CacheSource::Loaded)
            }
        };

        let payload = load.await?;
        Ok(CacheLookup { payload, source })
    }

    fn hit(&self, fp: &Fingerprint, backend: &BackendId, payload: Payload) -> CacheLookup {
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = %backend, fingerprint = %fp.short(), "Cache hit");
        CacheLookup {
            payload,
            source: CacheSource::Hit,
        }
    }

    fn spawn_load<Fut>(&self, fp: Fingerprint, backend: BackendId, load: Fut) -> SharedLoad
    where
        Fut: Future<Output = LoadResult> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let generation = inner.index.lock().generation(&backend);

        let task = tokio::spawn(async move {
            let result = load.await;
            match &result {
                Ok(payload) => inner.store(fp.clone(), backend, payload.clone(), generation),
                Err(failure) => {
                    inner.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        backend = %backend,
                        fingerprint = %fp.short(),
                        error = %failure,
                        "Load failed; not cached"
                    );
                }
            }
            inner.inflight.remove(&fp);
            result
        });

        async move {
            task.await.unwrap_or_else(|join_error| {
                Err(InvocationFailure {
                    error: DriverError::BackendError(format!("Load task failed: {join_error}")),
                    attempts: 0,
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Removes every entry from `backend`. Returns the number removed.
    ///
    /// Loads for `backend` already in flight still answer their waiters but
    /// are not stored. Other backends' loads are unaffected.
    pub fn invalidate(&self, backend: &BackendId) -> usize {
        let removed = {
            let mut index = self.inner.index.lock();
            *index.generations.entry(backend.clone()).or_insert(0) += 1;
            index.lru.retain(|entry| &entry.backend != backend)
        };
        self.inner
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::info!(backend = %backend, removed, "Invalidated cache entries");
        removed
    }

    /// Removes every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut index = self.inner.index.lock();
            index.epoch += 1;
            index.lru.clear()
        };
        self.inner
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::info!(removed, "Cleared cache");
        removed
    }

    /// Number of loads currently in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Current statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let joined = c.joined.load(Ordering::Relaxed);
        let (entries, weight) = {
            let index = self.inner.index.lock();
            (index.lru.len(), index.lru.weight())
        };
        let lookups = hits + misses + joined;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hits + joined) as f64 / lookups as f64
        };

        CacheStats {
            enabled: self.inner.settings.enabled,
            hits,
            misses,
            joined,
            load_failures: c.load_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            entries,
            weight,
            hit_rate,
        }
    }
}
