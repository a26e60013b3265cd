//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the gateway listener
//! - Pick the OAuth bridge and launch the helper when supervised
//! - Serve until shutdown, then stop the helper exactly once
//!
//! # Design Decisions
//! - Bind failures are fatal (the binary exits with status 1)
//! - A helper that fails to spawn is not fatal: the gateway keeps serving
//!   assets and answers OAuth routes with 502

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{GatewayConfig, OAuthMode};
use crate::http::error::GatewayError;
use crate::http::GatewayServer;
use crate::lifecycle::Shutdown;
use crate::oauth::{OAuthBridge, OAuthSupervisor, ProcessRecord, ProxyBridge};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid OAuth bridge configuration: {0}")]
    Bridge(#[source] GatewayError),

    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

impl StartupError {
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, StartupError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

/// Bind the gateway listener.
pub async fn bind(config: &GatewayConfig) -> Result<TcpListener, StartupError> {
    let addr = config.listener.bind_address();
    TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

/// Bind, serve until `shutdown` fires, then stop the OAuth helper.
///
/// Returns the helper's final record in supervised mode.
pub async fn run(config: GatewayConfig, shutdown: Shutdown) -> Result<Option<ProcessRecord>, StartupError> {
    let listener = bind(&config).await?;
    run_with_listener(config, listener, shutdown).await
}

/// Same as [`run`] on an already bound listener.
pub async fn run_with_listener(
    config: GatewayConfig,
    listener: TcpListener,
    shutdown: Shutdown,
) -> Result<Option<ProcessRecord>, StartupError> {
    let bridge = ProxyBridge::new(&config.oauth).map_err(StartupError::Bridge)?;

    let supervisor = match config.oauth.mode {
        OAuthMode::Supervised => match OAuthSupervisor::launch(&config.oauth) {
            Ok(supervisor) => Some(supervisor),
            Err(e) => {
                tracing::error!(error = %e, "OAuth helper unavailable, OAuth routes will answer 502");
                None
            }
        },
        OAuthMode::External => {
            tracing::info!(address = %config.oauth.target(), "Using external OAuth helper");
            None
        }
    };

    let served = serve_with_bridge(config, listener, Arc::new(bridge), shutdown).await;

    let record = match &supervisor {
        Some(supervisor) => Some(supervisor.shutdown().await),
        None => None,
    };
    served?;

    tracing::info!("Shutdown complete");
    Ok(record)
}

/// Serve with a caller-provided bridge, e.g. an in-process OAuth handler.
pub async fn serve_with_bridge(
    config: GatewayConfig,
    listener: TcpListener,
    bridge: Arc<dyn OAuthBridge>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let server = GatewayServer::new(config, bridge);
    let result = server.run(listener, shutdown.clone()).await;
    // Background tasks (rate-limit sweeper) stop with the server.
    shutdown.trigger();
    result.map_err(StartupError::from)
}
