//! Configuration loading.
//!
//! The typed configuration lives in [`shared::config`]. This module finds and
//! reads it:
//!
//! 1. `.env` is loaded into the process environment when present
//! 2. The YAML file named by `--config` / `OTEL_GATEWAY_CONFIG` is read, else
//!    `config.yaml` in the working directory if it exists, else defaults
//! 3. `OTEL_GATEWAY_*` environment variables override individual fields
//! 4. The result is validated
//!
//! Supported overrides:
//! - `OTEL_GATEWAY_HOST`
//! - `OTEL_GATEWAY_PORT`
//! - `OTEL_GATEWAY_CACHE_ENABLED`
//! - `OTEL_GATEWAY_CACHE_MAX_ENTRIES`
//! - `OTEL_GATEWAY_REQUEST_TIMEOUT_MS`

use anyhow::{Context, Result};
use shared::config::{GatewayConfig, ServerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "OTEL_GATEWAY_";

/// Config file used when none is named explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Loads the gateway configuration.
///
/// `path` is the file named on the command line (or through
/// `OTEL_GATEWAY_CONFIG`); it must exist when given.
///
/// # Errors
///
/// Returns an error if:
/// - The named config file cannot be read or is not valid YAML
/// - An environment override cannot be parsed
/// - The resulting configuration fails validation
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        tracing::debug!(path = %env_file.display(), "Loaded .env file");
    }

    let mut config = match resolve_path(path) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration file");
            read_config_file(&path)?
        }
        None => {
            tracing::info!("No configuration file found, using defaults");
            GatewayConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate_config()?;
    Ok(config)
}

fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

/// Reads and parses one YAML config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_config_file(path: &Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Parses a YAML document into a configuration. Missing fields take their
/// defaults; an empty document yields the default configuration.
///
/// # Errors
///
/// Returns an error if the document is not valid YAML for [`GatewayConfig`].
pub fn parse_config(raw: &str) -> Result<GatewayConfig> {
    if raw.trim().is_empty() {
        return Ok(GatewayConfig::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// Applies `OTEL_GATEWAY_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns an error naming the variable when a value cannot be parsed.
pub fn apply_env_overrides(
    config: &mut GatewayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(host) = var("HOST") {
        config.server.host = host;
    }
    if let Some(port) = var("PORT") {
        config.server.port = parse_var("PORT", &port)?;
    }
    if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
        config.server.request_timeout_ms = parse_var("REQUEST_TIMEOUT_MS", &ms)?;
    }
    if let Some(enabled) = var("CACHE_ENABLED") {
        config.cache.enabled = parse_var("CACHE_ENABLED", &enabled)?;
    }
    if let Some(entries) = var("CACHE_MAX_ENTRIES") {
        config.cache.max_entries = parse_var("CACHE_MAX_ENTRIES", &entries)?;
    }
    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value '{value}' for {ENV_PREFIX}{name}"))
}

/// Returns the socket address for binding.
///
/// # Errors
///
/// Returns an error if the host and port do not form a valid socket address.
pub fn socket_addr(server: &ServerConfig) -> Result<SocketAddr> {
    format!("{}:{}", server.host, server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", server.host, server.port))
}
