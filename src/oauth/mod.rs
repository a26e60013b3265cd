//! OAuth subsystem bridging.
//!
//! # Data Flow
//! ```text
//! /auth*, /callback* request
//!     → OAuthBridge::forward
//!         ├─ in_process.rs: call the handler directly (no network hop)
//!         └─ proxy.rs: HTTP over loopback to the helper process
//!                         ↑
//!              supervisor.rs launches, watches and stops that process
//! ```
//!
//! # Design Decisions
//! - Both strategies sit behind one trait so the external routes never change
//! - Only the proxy strategy can report `UpstreamUnavailable`; a fault inside
//!   the in-process handler is an ordinary `InternalFault`

pub mod in_process;
pub mod proxy;
pub mod supervisor;

use axum::{body::Body, http::Request, response::Response};
use futures_util::future::BoxFuture;

use crate::http::error::GatewayError;

pub use in_process::InProcessBridge;
pub use proxy::ProxyBridge;
pub use supervisor::{ExitInfo, OAuthSupervisor, ProcessRecord, ProcessState};

/// Forwards OAuth traffic to whatever performs the provider handshake.
pub trait OAuthBridge: Send + Sync + 'static {
    /// Forward `request`, preserving its full path and query.
    fn forward(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response, GatewayError>>;

    /// Short strategy name for logs.
    fn strategy(&self) -> &'static str;
}
