//! Builds the driver registry from configuration.
//!
//! Only the `in_memory` family has an adapter linked into this binary.
//! Applications embedding the gateway register their own drivers for the
//! remote families with [`DriverRegistry::register`] before building the
//! [`AppState`](crate::state::AppState).

use anyhow::{Context, Result};
use shared::config::{BackendConfig, GatewayConfig};
use shared::driver::{
    BackendHandle, BackendKind, Driver, DriverRegistry, InMemoryDriver, InMemoryFixture,
};
use std::path::Path;
use std::sync::Arc;

/// Creates a registry holding every configured backend this binary has an
/// adapter for.
///
/// Backends of other families are logged and left out.
///
/// # Errors
///
/// Returns an error if a fixture file cannot be read or parsed, or if two
/// backends share an id.
pub fn build_registry(config: &GatewayConfig) -> Result<DriverRegistry> {
    let mut registry = DriverRegistry::new();

    for backend in &config.backends {
        let Some(driver) = build_driver(backend)? else {
            tracing::warn!(
                backend = %backend.id,
                kind = %backend.kind,
                endpoint = backend.endpoint.as_deref().unwrap_or("-"),
                "No adapter linked for backend family, skipping"
            );
            continue;
        };
        registry.register(BackendHandle::from_config(backend, driver))?;
    }

    Ok(registry)
}

fn build_driver(backend: &BackendConfig) -> Result<Option<Arc<dyn Driver>>> {
    match backend.kind {
        BackendKind::InMemory => {
            let driver = match &backend.fixture {
                Some(path) => {
                    let fixture = load_fixture(path)
                        .with_context(|| format!("Backend '{}'", backend.id))?;
                    InMemoryDriver::from_fixture(fixture)
                }
                None => InMemoryDriver::new(),
            };
            Ok(Some(Arc::new(driver)))
        }
        BackendKind::OtelCollector
        | BackendKind::Grafana
        | BackendKind::ElasticCloud
        | BackendKind::Opensearch => Ok(None),
    }
}

fn load_fixture(path: &Path) -> Result<InMemoryFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    let fixture = InMemoryFixture::from_json(&raw)?;
    tracing::info!(
        path = %path.display(),
        traces = fixture.traces.len(),
        logs = fixture.logs.len(),
        metrics = fixture.metrics.len(),
        "Loaded in-memory fixture"
    );
    Ok(fixture)
}
