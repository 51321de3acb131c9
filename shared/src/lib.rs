//! OTel Query Gateway Core
//!
//! This crate contains the canonical models, the backend driver contract,
//! the response cache and the query and correlation engines of the gateway.
//!
//! # Modules
//!
//! - [`models`] - Canonical traces, logs, metrics and queries
//! - [`driver`] - Driver trait, backend registry and the in-memory driver
//! - [`resilience`] - Timeouts, retries and concurrency limits around driver calls
//! - [`cache`] - Single-flight response cache keyed by query fingerprint
//! - [`orchestrator`] - Fan-out, partial failure handling and merging
//! - [`correlation`] - Joining traces with logs and metrics
//! - [`config`] - Typed gateway configuration
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chrono::Utc;
//! use shared::cache::{CacheSettings, FingerprintCache};
//! use shared::driver::{BackendHandle, DriverRegistry, InMemoryDriver};
//! use shared::models::{LogRecord, Query, Severity, TimeRange};
//! use shared::orchestrator::QueryOrchestrator;
//! use shared::resilience::{ResilientInvoker, TracingSink};
//!
//! let now = Utc::now();
//! let driver = InMemoryDriver::new();
//! driver
//!     .insert_logs(vec![LogRecord::new(now, Severity::Error, "payment failed", "checkout")])
//!     .unwrap();
//!
//! let mut registry = DriverRegistry::new();
//! registry.register(BackendHandle::new("local", Arc::new(driver))).unwrap();
//!
//! let orchestrator = QueryOrchestrator::new(
//!     Arc::new(registry),
//!     FingerprintCache::new(CacheSettings::default()),
//!     ResilientInvoker::new(8, Arc::new(TracingSink)),
//! );
//!
//! let range = TimeRange::last(chrono::Duration::minutes(5), now).unwrap();
//! let query = Query::logs(range).with_service("checkout");
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
//!
//! let result = tokio_test::block_on(orchestrator.search_logs(&query, deadline)).unwrap();
//! assert_eq!(result.data.len(), 1);
//! assert_eq!(result.data[0].backend.as_str(), "local");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod correlation;
pub mod driver;
pub mod models;
pub mod orchestrator;
pub mod resilience;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
