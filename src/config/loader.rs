//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{GatewayConfig, OAuthMode};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value `{value}` for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Resolve the startup configuration: optional TOML file, then environment
/// overrides, then validation. Called once; the result is never re-read.
pub fn resolve(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Unset and blank variables leave the current value untouched.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("HOST") {
        config.listener.host = host.trim().to_string();
    }
    if let Some(port) = get("PORT") {
        config.listener.port = parse_env("PORT", &port)?;
    }
    if let Some(env) = get("NODE_ENV") {
        config.environment = env.trim().to_string();
    }
    if let Some(origins) = get("ORIGINS") {
        config.security.allowed_origins = split_origins(&origins);
    }

    if let Some(mode) = get("OAUTH_MODE") {
        config.oauth.mode = parse_env::<OAuthMode>("OAUTH_MODE", &mode)?;
    }
    if let Some(host) = get("OAUTH_HOST") {
        config.oauth.host = host.trim().to_string();
    }
    if let Some(port) = get("OAUTH_PORT") {
        config.oauth.port = parse_env("OAUTH_PORT", &port)?;
    }
    if let Some(command) = get("OAUTH_COMMAND") {
        config.oauth.command = command.trim().to_string();
    }
    if let Some(args) = get("OAUTH_ARGS") {
        config.oauth.args = args.split_whitespace().map(str::to_string).collect();
    }
    if let Some(secs) = get("OAUTH_TIMEOUT_SECS") {
        config.oauth.timeout_secs = parse_env("OAUTH_TIMEOUT_SECS", &secs)?;
    }
    if let Some(n) = get("OAUTH_MAX_RESTARTS") {
        config.oauth.max_restarts = parse_env("OAUTH_MAX_RESTARTS", &n)?;
    }

    if let Some(max) = get("RATE_LIMIT_MAX") {
        config.rate_limit.max_requests = parse_env("RATE_LIMIT_MAX", &max)?;
    }
    if let Some(secs) = get("RATE_LIMIT_WINDOW_SECS") {
        config.rate_limit.window_secs = parse_env("RATE_LIMIT_WINDOW_SECS", &secs)?;
    }
    if let Some(hops) = get("TRUST_PROXY_HOPS") {
        config.rate_limit.trust_proxy_hops = parse_env("TRUST_PROXY_HOPS", &hops)?;
    }

    if let Some(dir) = get("APP_DIR") {
        config.assets.app_dir = PathBuf::from(dir.trim());
    }
    if let Some(file) = get("CONFIG_YML") {
        config.assets.config_file = Some(PathBuf::from(file.trim()));
    }
    if let Some(addr) = get("METRICS_ADDR") {
        config.observability.metrics_address = Some(addr.trim().to_string());
    }

    Ok(())
}

/// Split a comma-separated origin list ("host1.com, foo.bar") into hostnames.
pub fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Env {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
