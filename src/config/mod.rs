//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (HOST, PORT, ORIGINS, OAUTH_*, ...)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is resolved once at startup and never re-read
//! - All fields have defaults to allow zero-config deployments
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{resolve, ConfigError};
pub use schema::{
    AssetConfig, GatewayConfig, ListenerConfig, OAuthConfig, OAuthMode, ObservabilityConfig,
    RateLimitConfig, SecurityConfig, TimeoutConfig,
};
