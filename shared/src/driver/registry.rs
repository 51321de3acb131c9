//! Registry of configured backends.

use super::{BackendKind, Capabilities, Driver};
use crate::config::BackendConfig;
use crate::models::{BackendId, BackendSelection, HealthStatus, Query, SignalType};
use crate::resilience::InvocationSettings;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised while registering backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A backend with this id is already registered.
    #[error("Backend '{0}' is already registered")]
    DuplicateBackend(BackendId),
}

/// A registered backend: its driver plus gateway-side settings.
#[derive(Clone)]
pub struct BackendHandle {
    /// Backend id.
    pub id: BackendId,
    /// Backend family.
    pub kind: BackendKind,
    /// The driver.
    pub driver: Arc<dyn Driver>,
    /// Disabled backends are only queried when selected explicitly.
    pub enabled: bool,
    /// Signals configured for this backend.
    pub signals: BTreeSet<SignalType>,
    /// Timeout and retry settings.
    pub settings: InvocationSettings,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

impl BackendHandle {
    /// Wraps a driver with default settings, offering whatever the driver offers.
    pub fn new(id: impl Into<BackendId>, driver: Arc<dyn Driver>) -> Self {
        let signals = driver.capabilities().signals;
        Self {
            id: id.into(),
            kind: driver.kind(),
            driver,
            enabled: true,
            signals,
            settings: InvocationSettings::default(),
        }
    }

    /// Wraps a driver using a backend's configuration.
    pub fn from_config(config: &BackendConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            id: BackendId::new(config.id.clone()),
            kind: config.kind,
            driver,
            enabled: config.enabled,
            signals: config.configured_signals(),
            settings: config.invocation_settings(),
        }
    }

    /// Enables or disables the backend.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Restricts the configured signals.
    #[must_use]
    pub fn with_signals(mut self, signals: impl IntoIterator<Item = SignalType>) -> Self {
        self.signals = signals.into_iter().collect();
        self
    }

    /// Replaces the invocation settings.
    #[must_use]
    pub fn with_settings(mut self, settings: InvocationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Effective capabilities: the driver's, narrowed to the configured signals.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities().restricted_to(&self.signals)
    }

    /// Returns true if the backend offers `signal`.
    #[must_use]
    pub fn offers(&self, signal: SignalType) -> bool {
        self.capabilities().supports(signal)
    }
}

/// Backends a query should be sent to.
#[derive(Debug, Clone, Default)]
pub struct Targets {
    /// Backends to dispatch to, in id order.
    pub dispatch: Vec<BackendHandle>,
    /// Backends not asked, with the reason.
    pub skipped: Vec<(BackendId, String)>,
    /// Explicitly selected ids that are not registered.
    pub unknown: Vec<BackendId>,
}

/// Health of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    /// Backend id.
    pub backend: BackendId,
    /// Backend family.
    pub kind: BackendKind,
    /// Health check result.
    #[serde(flatten)]
    pub status: HealthStatus,
    /// Health check latency in milliseconds.
    pub latency_ms: u64,
}

/// Ordered map of registered backends.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    backends: BTreeMap<BackendId, BackendHandle>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateBackend`] if the id is taken.
    pub fn register(&mut self, handle: BackendHandle) -> Result<(), RegistryError> {
        if self.backends.contains_key(&handle.id) {
            return Err(RegistryError::DuplicateBackend(handle.id));
        }
        tracing::info!(
            backend = %handle.id,
            kind = %handle.kind,
            enabled = handle.enabled,
            "Registered backend"
        );
        self.backends.insert(handle.id.clone(), handle);
        Ok(())
    }

    /// Looks up a backend.
    #[must_use]
    pub fn get(&self, id: &BackendId) -> Option<&BackendHandle> {
        self.backends.get(id)
    }

    /// All backends in id order.
    pub fn iter(&self) -> impl Iterator<Item = &BackendHandle> {
        self.backends.values()
    }

    /// Number of registered backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Resolves the backends `query` targets.
    #[must_use]
    pub fn targets(&self, query: &Query) -> Targets {
        self.targets_for(query.signal(), query.backends())
    }

    /// Resolves the backends a selection targets for `signal`.
    ///
    /// With [`BackendSelection::AllEnabled`], disabled backends are left out
    /// silently and enabled ones not offering the signal are skipped. With an
    /// explicit selection, disabled backends are skipped too and unregistered
    /// ids are reported as unknown.
    #[must_use]
    pub fn targets_for(&self, signal: SignalType, selection: &BackendSelection) -> Targets {
        let mut targets = Targets::default();

        let mut consider = |handle: &BackendHandle, explicit: bool| {
            if !handle.enabled {
                if explicit {
                    targets
                        .skipped
                        .push((handle.id.clone(), "backend disabled".to_string()));
                }
            } else if handle.offers(signal) {
                targets.dispatch.push(handle.clone());
            } else {
                targets
                    .skipped
                    .push((handle.id.clone(), format!("{signal} signal not offered")));
            }
        };

        match selection {
            BackendSelection::AllEnabled => {
                for handle in self.backends.values() {
                    consider(handle, false);
                }
            }
            BackendSelection::Only(ids) => {
                for id in ids {
                    match self.backends.get(id) {
                        Some(handle) => consider(handle, true),
                        None => targets.unknown.push(id.clone()),
                    }
                }
            }
        }
        targets
    }

    /// Checks every enabled backend concurrently. Each check is bounded by the
    /// backend's attempt timeout.
    pub async fn health_check_all(&self) -> Vec<BackendHealth> {
        let checks = self
            .backends
            .values()
            .filter(|h| h.enabled)
            .map(|handle| async move {
                let started = Instant::now();
                let check = handle.driver.health_check();
                let status = tokio::time::timeout(handle.settings.timeout, check)
                    .await
                    .unwrap_or_else(|_| HealthStatus::unhealthy("Health check timed out"));
                let elapsed = started.elapsed().as_millis();
                BackendHealth {
                    backend: handle.id.clone(),
                    kind: handle.kind,
                    status,
                    latency_ms: u64::try_from(elapsed).unwrap_or(u64::MAX),
                }
            });
        join_all(checks).await
    }
}
