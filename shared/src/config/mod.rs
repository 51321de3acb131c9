//! Gateway configuration.
//!
//! Typed, validated configuration consumed by the core. Loading (YAML files,
//! `.env`, environment overrides) happens in the server binary; this module
//! only defines the shape, the defaults and the validation rules.
//!
//! ```yaml
//! server:
//!   port: 9090
//!   request_timeout_ms: 10000
//! cache:
//!   max_entries: 5000
//!   ttl:
//!     logs_secs: 120
//! correlation:
//!   cross_backend_dedup: true
//! backends:
//!   - id: local
//!     kind: in_memory
//!     fixture: fixtures/demo.json
//! ```

pub mod backend;
pub mod cache;

pub use backend::BackendConfig;
pub use cache::{CacheConfig, SignalTtls};

use crate::driver::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// Two backends share an id.
    #[error("Duplicate backend id '{0}'")]
    DuplicateBackend(String),

    /// A backend's base retry delay exceeds its cap.
    #[error("Backend '{0}': retry_delay_ms cannot exceed max_retry_delay_ms")]
    RetryDelay(String),

    /// Nothing to serve queries from.
    #[error("At least one enabled backend is required")]
    NoEnabledBackends,
}

/// HTTP server and request handling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported by the server info endpoint.
    #[validate(length(min = 1, message = "Server name cannot be empty"))]
    pub name: String,
    /// Host address to bind to.
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Default deadline for one inbound request.
    #[validate(range(min = 1, message = "request_timeout_ms must be at least 1"))]
    pub request_timeout_ms: u64,
    /// Global bound on simultaneous backend attempts.
    #[validate(range(min = 1, message = "max_concurrent_backend_calls must be at least 1"))]
    pub max_concurrent_backend_calls: usize,
}

impl ServerConfig {
    /// Default request deadline as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "otel-query-gateway".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 30_000,
            max_concurrent_backend_calls: 32,
        }
    }
}

/// Correlation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Padding added on both sides of a trace's observed span.
    pub default_pad_ms: u64,
    /// Maximum number of correlated log records.
    #[validate(range(min = 1, max = 10_000, message = "log_limit must be 1..=10000"))]
    pub log_limit: usize,
    /// Collapse identical records (same timestamp, body and service) returned
    /// by different backends.
    pub cross_backend_dedup: bool,
}

impl CorrelationConfig {
    /// Default pad as a `chrono::Duration`.
    #[must_use]
    pub fn default_pad(&self) -> chrono::Duration {
        i64::try_from(self.default_pad_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_pad_ms: 5_000,
            log_limit: 1_000,
            cross_backend_dedup: false,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server settings.
    #[validate(nested)]
    pub server: ServerConfig,
    /// Cache settings.
    #[validate(nested)]
    pub cache: CacheConfig,
    /// Correlation settings.
    #[validate(nested)]
    pub correlation: CorrelationConfig,
    /// Configured backends.
    #[validate(nested)]
    pub backends: Vec<BackendConfig>,
}

impl Default for GatewayConfig {
    /// Defaults to a single in-memory backend named `local`, so a bare
    /// gateway starts and answers (empty) queries.
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            correlation: CorrelationConfig::default(),
            backends: vec![BackendConfig::new("local", BackendKind::InMemory)],
        }
    }
}

impl GatewayConfig {
    /// Validates field ranges and cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any field is out of range
    /// - Two backends share an id
    /// - A backend's retry delay exceeds its maximum retry delay
    /// - No backend is enabled
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let mut ids = BTreeSet::new();
        for backend in &self.backends {
            if !ids.insert(backend.id.as_str()) {
                return Err(ConfigError::DuplicateBackend(backend.id.clone()));
            }
            if backend.retry_delay_ms > backend.max_retry_delay_ms {
                return Err(ConfigError::RetryDelay(backend.id.clone()));
            }
        }

        if !self.backends.iter().any(|b| b.enabled) {
            return Err(ConfigError::NoEnabledBackends);
        }
        Ok(())
    }

    /// Looks up a backend by id.
    #[must_use]
    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate_config().is_ok());
        assert_eq!(config.server.name, "otel-query-gateway");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.server.max_concurrent_backend_calls, 32);
        assert_eq!(config.correlation.default_pad_ms, 5_000);
        assert!(!config.correlation.cross_backend_dedup);
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let mut config = GatewayConfig::default();
        config
            .backends
            .push(BackendConfig::new("local", BackendKind::Grafana));

        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::DuplicateBackend(id)) if id == "local"
        ));
    }

    #[test]
    fn test_retry_delay_above_cap_rejected() {
        let mut config = GatewayConfig::default();
        config.backends[0].retry_delay_ms = 60_000;

        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::RetryDelay(_))
        ));
    }

    #[test]
    fn test_no_enabled_backends_rejected() {
        let mut config = GatewayConfig::default();
        config.backends[0].enabled = false;

        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::NoEnabledBackends)
        ));
    }

    #[test]
    fn test_nested_validation() {
        let mut config = GatewayConfig::default();
        config.cache.max_entries = 0;
        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = GatewayConfig::default();
        config.backends[0].timeout_ms = 0;
        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{
            "server": {"port": 9090},
            "backends": [
                {"id": "tempo", "kind": "grafana", "signals": ["trace"]},
                {"id": "os", "kind": "opensearch", "enabled": false}
            ]
        }"#;
        let config: GatewayConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.backends.len(), 2);
        assert!(!config.backend("os").unwrap().enabled);
        assert!(config.validate_config().is_ok());
    }
}
