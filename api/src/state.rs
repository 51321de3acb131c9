//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::cache::{CacheSettings, FingerprintCache};
use shared::config::GatewayConfig;
use shared::correlation::CorrelationEngine;
use shared::driver::DriverRegistry;
use shared::orchestrator::{DedupPolicy, QueryOrchestrator};
use shared::resilience::{OutcomeSink, ResilientInvoker, TracingSink};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::build_registry;

/// Application state shared across all request handlers.
///
/// Cloning is cheap: the orchestrator, cache and registry are shared.
#[derive(Clone)]
pub struct AppState {
    orchestrator: QueryOrchestrator,
    correlation: Arc<CorrelationEngine>,
    config: Arc<GatewayConfig>,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Wires the core around `registry`, reporting outcomes through
    /// [`TracingSink`].
    #[must_use]
    pub fn new(config: GatewayConfig, registry: DriverRegistry) -> Self {
        Self::with_sink(config, registry, Arc::new(TracingSink))
    }

    /// Wires the core around `registry` with a custom outcome sink.
    #[must_use]
    pub fn with_sink(
        config: GatewayConfig,
        registry: DriverRegistry,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        let cache = FingerprintCache::new(CacheSettings::from(&config.cache));
        let invoker = ResilientInvoker::new(config.server.max_concurrent_backend_calls, sink);
        let orchestrator = QueryOrchestrator::new(Arc::new(registry), cache, invoker).with_dedup(
            DedupPolicy {
                cross_backend: config.correlation.cross_backend_dedup,
            },
        );
        let correlation = CorrelationEngine::new(orchestrator.clone(), &config.correlation);

        Self {
            orchestrator,
            correlation: Arc::new(correlation),
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }

    /// Builds the registry from `config` and wires the core around it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be built.
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let registry = build_registry(&config)?;
        Ok(Self::new(config, registry))
    }

    /// Returns the query orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    /// Returns the correlation engine.
    #[must_use]
    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    /// Returns the backend registry.
    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        self.orchestrator.registry()
    }

    /// Returns the response cache.
    #[must_use]
    pub fn cache(&self) -> &FingerprintCache {
        self.orchestrator.cache()
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Default deadline for one request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.config.server.request_timeout()
    }

    /// When this state was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
