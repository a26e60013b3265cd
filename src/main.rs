//! Decap CMS edge gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request
//!        │
//!        ▼
//!   ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//!   │ rate limit │──▶│  origin  │──▶│ CSRF guard│──▶│  dispatch  │
//!   └────────────┘   └──────────┘   └───────────┘   └─────┬──────┘
//!                                                         │
//!                       ┌─────────────────────────────────┼──────────────┐
//!                       ▼                                 ▼              ▼
//!                ┌────────────┐                   ┌──────────────┐  ┌──────────┐
//!                │  /healthz  │                   │ OAuth bridge │  │  assets  │
//!                │ /csrf-token│                   │ (loopback)   │  │ (files)  │
//!                └────────────┘                   └──────┬───────┘  └──────────┘
//!                                                        ▼
//!                                                 supervised child
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use decap_gateway::config::{self, ObservabilityConfig};
use decap_gateway::lifecycle::{signals, startup, Shutdown};
use decap_gateway::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "decap-gateway", version, about = "HTTP edge gateway for Decap CMS")]
struct Cli {
    /// Optional TOML configuration file; environment variables override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.listener.bind_address(),
        environment = %config.environment,
        oauth_mode = ?config.oauth.mode,
        "decap-gateway starting"
    );

    if let Some(addr) = &config.observability.metrics_address {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(metrics_address = %addr, error = %e, "Failed to parse metrics address"),
        }
    }

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    match startup::run(config, shutdown).await {
        Ok(record) => {
            if let Some(record) = record {
                tracing::info!(
                    restarts = record.restarts,
                    exit = ?record.last_exit,
                    "OAuth helper final state"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_addr_in_use() {
                tracing::error!(error = %e, "Port already in use");
            } else {
                tracing::error!(error = %e, "Gateway failed");
            }
            ExitCode::FAILURE
        }
    }
}
