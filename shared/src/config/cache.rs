//! Cache configuration.
//!
//! Cache entries expire per signal type: traces are immutable once complete
//! and live longest, metrics change every scrape and live shortest.

use crate::models::SignalType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Time-to-live per signal type, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SignalTtls {
    /// TTL for trace results.
    #[validate(range(min = 1, max = 86_400, message = "Trace TTL must be 1..=86400 seconds"))]
    pub traces_secs: u64,
    /// TTL for log results.
    #[validate(range(min = 1, max = 86_400, message = "Log TTL must be 1..=86400 seconds"))]
    pub logs_secs: u64,
    /// TTL for metric results.
    #[validate(range(min = 1, max = 86_400, message = "Metric TTL must be 1..=86400 seconds"))]
    pub metrics_secs: u64,
}

impl SignalTtls {
    /// Creates TTLs from seconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::SignalTtls;
    ///
    /// let ttls = SignalTtls::new(600, 300, 60);
    /// assert_eq!(ttls.logs().as_secs(), 300);
    /// ```
    #[must_use]
    pub fn new(traces_secs: u64, logs_secs: u64, metrics_secs: u64) -> Self {
        Self {
            traces_secs,
            logs_secs,
            metrics_secs,
        }
    }

    /// TTL for trace results.
    #[must_use]
    pub fn traces(&self) -> Duration {
        Duration::from_secs(self.traces_secs)
    }

    /// TTL for log results.
    #[must_use]
    pub fn logs(&self) -> Duration {
        Duration::from_secs(self.logs_secs)
    }

    /// TTL for metric results.
    #[must_use]
    pub fn metrics(&self) -> Duration {
        Duration::from_secs(self.metrics_secs)
    }

    /// TTL for a signal type.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::SignalTtls;
    /// use shared::models::SignalType;
    ///
    /// let ttls = SignalTtls::default();
    /// assert_eq!(ttls.for_signal(SignalType::Metric).as_secs(), 60);
    /// ```
    #[must_use]
    pub fn for_signal(&self, signal: SignalType) -> Duration {
        match signal {
            SignalType::Trace => self.traces(),
            SignalType::Log => self.logs(),
            SignalType::Metric => self.metrics(),
        }
    }

    /// Updates the TTL for one signal type.
    pub fn set(&mut self, signal: SignalType, secs: u64) {
        match signal {
            SignalType::Trace => self.traces_secs = secs,
            SignalType::Log => self.logs_secs = secs,
            SignalType::Metric => self.metrics_secs = secs,
        }
    }
}

impl Default for SignalTtls {
    /// Returns the default TTLs:
    /// - Traces: 600 seconds
    /// - Logs: 300 seconds
    /// - Metrics: 60 seconds
    fn default() -> Self {
        Self::new(600, 300, 60)
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every request goes to the backends.
    pub enabled: bool,
    /// Maximum number of cached results.
    #[validate(range(min = 1, message = "Cache max_entries must be at least 1"))]
    pub max_entries: usize,
    /// Optional bound on the summed weight (spans + records + points).
    #[validate(range(min = 1, message = "Cache max_weight must be at least 1"))]
    pub max_weight: Option<usize>,
    /// TTLs per signal type.
    #[validate(nested)]
    pub ttl: SignalTtls,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            max_weight: None,
            ttl: SignalTtls::default(),
        }
    }
}
