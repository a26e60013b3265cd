//! HTTP edge gateway for Decap CMS.
//!
//! Serves the CMS bundle and static assets, gates write traffic with rate
//! limiting, an origin allow-list and anti-forgery tokens, and bridges the
//! `/auth` and `/callback` routes to an OAuth helper.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod oauth;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::{GatewayError, GatewayServer};
pub use lifecycle::Shutdown;
