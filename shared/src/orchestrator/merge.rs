//! Merging per-backend results into one deterministic answer.
//!
//! Arrival order never matters: every function here sorts its input by
//! backend id before deduplicating, so when two results collide the one from
//! the backend that sorts first is kept.

use crate::models::{BackendId, LogRecord, MetricSeries, TraceResult};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// How log records from different backends are deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupPolicy {
    /// Also collapse records without a shared native id whose timestamp,
    /// body and service are identical across backends.
    pub cross_backend: bool,
}

impl DedupPolicy {
    /// Per-backend deduplication only.
    #[must_use]
    pub fn per_backend() -> Self {
        Self::default()
    }

    /// Deduplication across backends.
    #[must_use]
    pub fn cross_backend() -> Self {
        Self {
            cross_backend: true,
        }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum LogKey<'a> {
    Native(&'a BackendId, &'a str),
    Content(Option<&'a BackendId>, DateTime<Utc>, &'a str, &'a str),
}

impl<'a> LogKey<'a> {
    fn content(record: &'a LogRecord, backend: Option<&'a BackendId>) -> Self {
        Self::Content(backend, record.timestamp, &record.body, &record.service)
    }
}

/// Removes duplicate log records.
///
/// A record with a native id is a duplicate of an earlier record with the
/// same `(backend, native id)`. Without a native id the fallback key
/// `(timestamp, body, service)` is used, scoped to one backend unless
/// `policy.cross_backend` is set. With cross-backend deduplication the
/// content key applies to every record, so one log line shipped to two
/// backends under different native ids is kept once.
///
/// The surviving records keep their relative order after a stable sort by
/// backend id.
#[must_use]
pub fn dedup_logs(mut records: Vec<LogRecord>, policy: DedupPolicy) -> Vec<LogRecord> {
    records.sort_by(|a, b| a.backend.cmp(&b.backend));

    let keep: Vec<bool> = {
        let mut seen: HashSet<LogKey<'_>> = HashSet::with_capacity(records.len());
        records
            .iter()
            .map(|r| {
                let native = r
                    .record_id
                    .as_deref()
                    .map(|id| LogKey::Native(&r.backend, id));

                match (native, policy.cross_backend) {
                    (Some(native), false) => seen.insert(native),
                    (Some(native), true) => {
                        let fresh_native = seen.insert(native);
                        let fresh_content = seen.insert(LogKey::content(r, None));
                        fresh_native && fresh_content
                    }
                    (None, false) => seen.insert(LogKey::content(r, Some(&r.backend))),
                    (None, true) => seen.insert(LogKey::content(r, None)),
                }
            })
            .collect()
    };

    records
        .into_iter()
        .zip(keep)
        .filter_map(|(r, keep)| keep.then_some(r))
        .collect()
}

/// Deduplicates, orders most recent first and truncates log records.
///
/// Ties on timestamp are broken by backend id, then native id.
#[must_use]
pub fn merge_logs(records: Vec<LogRecord>, limit: usize, policy: DedupPolicy) -> Vec<LogRecord> {
    let mut records = dedup_logs(records, policy);
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.backend.cmp(&b.backend))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    records.truncate(limit);
    records
}

/// Deduplicates by `(backend, trace id)`, orders most recent first and
/// truncates trace results.
///
/// Results for the same trace from one backend are merged span by span.
/// Results from different backends stay distinct.
#[must_use]
pub fn merge_traces(mut traces: Vec<TraceResult>, limit: usize) -> Vec<TraceResult> {
    traces.sort_by(|a, b| {
        a.backend
            .cmp(&b.backend)
            .then_with(|| a.trace_id.cmp(&b.trace_id))
    });

    let mut merged: Vec<TraceResult> = Vec::with_capacity(traces.len());
    for trace in traces {
        match merged.last_mut() {
            Some(last) if last.backend == trace.backend && last.trace_id == trace.trace_id => {
                last.merge_spans(trace.spans().iter().cloned());
            }
            _ => merged.push(trace),
        }
    }

    merged.sort_by(|a, b| {
        b.start_time()
            .cmp(&a.start_time())
            .then_with(|| a.backend.cmp(&b.backend))
            .then_with(|| a.trace_id.cmp(&b.trace_id))
    });
    merged.truncate(limit);
    merged
}

/// Orders metric series by name, labels, then backend.
///
/// Series with the same name and labels from different backends stay
/// distinct; the limit was already applied by each backend.
#[must_use]
pub fn merge_metrics(mut series: Vec<MetricSeries>) -> Vec<MetricSeries> {
    series.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.labels.cmp(&b.labels))
            .then_with(|| a.backend.cmp(&b.backend))
    });
    series
}

/// Merges the spans of every result for one trace into a single result.
///
/// The merged result is attributed to the backend that sorts first. Returns
/// `None` when there is nothing to merge.
#[must_use]
pub fn combine_trace(trace_id: &str, results: Vec<TraceResult>) -> Option<TraceResult> {
    let mut results: Vec<TraceResult> = results
        .into_iter()
        .filter(|t| t.trace_id == trace_id)
        .collect();
    results.sort_by(|a, b| a.backend.cmp(&b.backend));

    let mut iter = results.into_iter();
    let mut combined = iter.next()?;
    for other in iter {
        combined.merge_spans(other.spans().iter().cloned());
    }
    Some(combined)
}
