//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits so a TOML file can seed the values before the
//! environment overrides are applied.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment environment (`NODE_ENV`). `production` marks cookies secure.
    pub environment: String,

    /// Listener configuration (host, port).
    pub listener: ListenerConfig,

    /// Origin allow-list, security headers and body limits.
    pub security: SecurityConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// OAuth subsystem location and child process settings.
    pub oauth: OAuthConfig,

    /// Static asset locations.
    pub assets: AssetConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            listener: ListenerConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            oauth: OAuthConfig::default(),
            assets: AssetConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Whether the gateway runs in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port to bind.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Hostnames allowed as cross-origin callers. Empty disables the origin policy.
    pub allowed_origins: Vec<String>,

    /// Add hardening response headers.
    pub headers: bool,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            headers: true,
            max_body_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per client within one window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Number of trusted reverse proxies in front of the gateway.
    pub trust_proxy_hops: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 600,
            window_secs: 60,
            trust_proxy_hops: 1,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// How the OAuth subsystem is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthMode {
    /// Spawn the helper as a child process and reverse-proxy to it.
    Supervised,
    /// Reverse-proxy to a helper someone else runs.
    External,
}

impl std::str::FromStr for OAuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supervised" => Ok(OAuthMode::Supervised),
            "external" => Ok(OAuthMode::External),
            other => Err(format!("unknown OAuth mode `{}`", other)),
        }
    }
}

/// OAuth subsystem configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub mode: OAuthMode,

    /// Host the OAuth helper listens on. Must be loopback when supervised.
    pub host: String,

    /// Port the OAuth helper listens on.
    pub port: u16,

    /// Program used to launch the helper.
    pub command: String,

    /// Arguments passed to `command`.
    pub args: Vec<String>,

    /// Deadline for a single proxied call, in seconds.
    pub timeout_secs: u64,

    /// How long to wait for the child to accept connections.
    pub startup_timeout_secs: u64,

    /// How long to wait after SIGTERM before SIGKILL.
    pub shutdown_grace_secs: u64,

    /// Restarts allowed after unexpected exits (0 = never restart).
    pub max_restarts: u32,

    /// Base delay for restart backoff in milliseconds.
    pub restart_backoff_ms: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            mode: OAuthMode::Supervised,
            host: "127.0.0.1".to_string(),
            port: 8080,
            command: "node".to_string(),
            args: vec!["../netlify-cms-github-oauth-provider/app.js".to_string()],
            timeout_secs: 5,
            startup_timeout_secs: 10,
            shutdown_grace_secs: 5,
            max_restarts: 0,
            restart_backoff_ms: 500,
        }
    }
}

impl OAuthConfig {
    /// Base URL of the OAuth helper, e.g. `http://127.0.0.1:8080`.
    pub fn target(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `host:port` the helper binds.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

/// Static asset locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding `dist/` and `public/`.
    pub app_dir: PathBuf,

    /// CMS configuration file. Defaults to `<app_dir>/../config.yml`.
    pub config_file: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            config_file: None,
        }
    }
}

impl AssetConfig {
    pub fn bundle_path(&self) -> PathBuf {
        self.app_dir.join("dist").join("decap-cms.js")
    }

    pub fn source_map_path(&self) -> PathBuf {
        self.app_dir.join("dist").join("decap-cms.js.map")
    }

    pub fn public_dir(&self) -> PathBuf {
        self.app_dir.join("public")
    }

    pub fn cms_config_path(&self) -> PathBuf {
        match &self.config_file {
            Some(path) => path.clone(),
            None => self.app_dir.join("..").join("config.yml"),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter, used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Prometheus exporter bind address. Metrics export is off when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "decap_gateway=info,tower_http=info".to_string(),
            metrics_address: None,
        }
    }
}
