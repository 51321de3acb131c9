//! OTel Query Gateway Binary
//!
//! Loads the configuration, sets up logging and serves the gateway API.

#![deny(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// OTel Query Gateway - one query interface over many observability backends
#[derive(Parser)]
#[command(name = "otel-query-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file (defaults to ./config.yaml when present)
    #[arg(short, long, env = "OTEL_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "OTEL_GATEWAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = api::load_config(cli.config.as_deref())?;
    api::run_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["otel-query-gateway", "--config", "gw.yaml", "--log-json"]);

        assert_eq!(cli.config, Some(PathBuf::from("gw.yaml")));
        assert!(cli.log_json);
    }
}
