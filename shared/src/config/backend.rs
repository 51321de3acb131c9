//! Backend configuration.

use crate::driver::BackendKind;
use crate::models::SignalType;
use crate::resilience::InvocationSettings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

/// One configured backend.
///
/// ```yaml
/// - id: tempo-eu
///   kind: grafana
///   endpoint: https://grafana.example.com
///   signals: [trace, log]
///   timeout_ms: 10000
///   hints:
///     loki_tenant: team-a
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Unique backend id.
    #[validate(length(min = 1, message = "Backend id cannot be empty"))]
    pub id: String,

    /// Backend family.
    pub kind: BackendKind,

    /// Disabled backends are only queried when selected explicitly.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1, message = "timeout_ms must be at least 1"))]
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10, message = "max_retries cannot exceed 10"))]
    pub max_retries: u32,

    /// Base retry delay.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Cap for the exponential retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Base URL of the backend API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Signals to query on this backend; defaults to the family's signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<BTreeSet<SignalType>>,

    /// Opaque backend-specific settings passed to the driver.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<String, String>,

    /// JSON fixture to seed an `in_memory` backend with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

impl BackendConfig {
    /// Creates a backend config with default invocation settings.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            endpoint: None,
            signals: None,
            hints: BTreeMap::new(),
            fixture: None,
        }
    }

    /// Sets the configured signals.
    #[must_use]
    pub fn with_signals(mut self, signals: impl IntoIterator<Item = SignalType>) -> Self {
        self.signals = Some(signals.into_iter().collect());
        self
    }

    /// Enables or disables the backend.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets timeout and retry behaviour.
    #[must_use]
    pub fn with_retries(mut self, timeout_ms: u64, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self.max_retry_delay_ms = self.max_retry_delay_ms.max(retry_delay_ms);
        self
    }

    /// Signals configured for this backend.
    #[must_use]
    pub fn configured_signals(&self) -> BTreeSet<SignalType> {
        self.signals
            .clone()
            .unwrap_or_else(|| self.kind.default_signals())
    }

    /// Invocation settings derived from this config.
    #[must_use]
    pub fn invocation_settings(&self) -> InvocationSettings {
        InvocationSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            hints: self.hints.clone(),
        }
    }
}
