//! Query fingerprints.

use crate::models::{BackendId, BackendSelection, Query};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable hash identifying one (normalized query, backend) pair.
///
/// Two queries that differ only in whitespace, service-name case, set ordering
/// or backend selection produce the same fingerprint for a given backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct Canonical<'a> {
    backend: &'a BackendId,
    query: &'a Query,
}

impl Fingerprint {
    /// Computes the fingerprint of `query` as sent to `backend`.
    #[must_use]
    pub fn compute(query: &Query, backend: &BackendId) -> Self {
        // Backend selection decides where a query goes, not what it returns.
        let query = query
            .normalized()
            .with_backends(BackendSelection::AllEnabled);
        let canonical = Canonical {
            backend,
            query: &query,
        };
        let bytes = serde_json::to_vec(&canonical)
            .unwrap_or_else(|_| format!("{backend}:{query:?}").into_bytes());

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;
    use chrono::{Duration, TimeZone, Utc};

    fn range() -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        TimeRange::new(start, start + Duration::hours(1)).unwrap()
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = Fingerprint::compute(&Query::traces(range()), &BackendId::from("tempo"));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_equivalent_queries_share_fingerprint() {
        let backend = BackendId::from("loki");
        let a = Query::logs(range())
            .with_service("Checkout")
            .with_services(["b", "a"]);
        let b = Query::logs(range())
            .with_service(" checkout ")
            .with_services(["a", "b"])
            .with_backends(BackendSelection::only(["loki"]));

        assert_eq!(
            Fingerprint::compute(&a, &backend),
            Fingerprint::compute(&b, &backend)
        );
    }

    #[test]
    fn test_backend_changes_fingerprint() {
        let query = Query::logs(range());
        assert_ne!(
            Fingerprint::compute(&query, &BackendId::from("loki")),
            Fingerprint::compute(&query, &BackendId::from("elastic"))
        );
    }

    #[test]
    fn test_filter_changes_fingerprint() {
        let backend = BackendId::from("loki");
        assert_ne!(
            Fingerprint::compute(&Query::logs(range()).with_text("a"), &backend),
            Fingerprint::compute(&Query::logs(range()).with_text("b"), &backend)
        );
        assert_ne!(
            Fingerprint::compute(&Query::logs(range()).with_limit(10), &backend),
            Fingerprint::compute(&Query::logs(range()).with_limit(20), &backend)
        );
    }
}
