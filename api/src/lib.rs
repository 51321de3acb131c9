//! OTel Query Gateway API Server
//!
//! HTTP surface of the gateway: one query interface over every configured
//! observability backend, with trace correlation and cache control.
//!
//! # Architecture
//!
//! The server is built on Axum and Tokio. Handlers translate requests into
//! canonical queries and hand them to the core in [`shared`]:
//! - Search endpoints for traces, logs and metrics
//! - A correlation endpoint joining a trace with its logs and metrics
//! - Per-service health summarized from recent spans
//! - Operational endpoints for backend health and the response cache
//!
//! # Example
//!
//! ```no_run
//! use api::{load_config, run_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(None)?;
//!     run_server(config).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod backends;
mod config;
mod routes;
mod state;

pub use backends::build_registry;
pub use config::{apply_env_overrides, load_config, parse_config, read_config_file, socket_addr};
pub use routes::ErrorResponse;
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use shared::config::GatewayConfig;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Runs the gateway with the backends this binary has adapters for.
///
/// Handles graceful shutdown on SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - The backend registry cannot be built
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server(config: GatewayConfig) -> Result<()> {
    let state = AppState::from_config(config)?;
    run_server_with_state(state).await
}

/// Runs the gateway over an already wired state.
///
/// Embedding applications register their own drivers in a
/// [`DriverRegistry`](shared::driver::DriverRegistry), build an [`AppState`]
/// from it and call this.
///
/// # Errors
///
/// Returns an error if:
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_state(state: AppState) -> Result<()> {
    let addr = socket_addr(&state.config().server)?;

    tracing::info!(
        name = %state.config().server.name,
        backends = state.registry().len(),
        cache_enabled = state.cache().is_enabled(),
        "OTel query gateway starting"
    );
    if state.registry().is_empty() {
        tracing::warn!("No backend registered, every query will answer 503");
    }

    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the main application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::query_routes(state.clone()))
        .merge(routes::correlate_routes(state.clone()))
        .merge(routes::service_routes(state.clone()))
        .merge(routes::admin_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
