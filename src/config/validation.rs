//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Keep the supervised OAuth helper on a loopback address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use crate::config::schema::{GatewayConfig, OAuthMode};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("OAuth host `{0}` is not a loopback address")]
    OAuthNotLoopback(String),

    #[error("OAuth port {0} collides with the gateway listener")]
    PortCollision(u16),

    #[error("OAuth command is empty")]
    EmptyCommand,
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::Zero { field: "listener.port" });
    }
    if config.oauth.port == 0 {
        errors.push(ValidationError::Zero { field: "oauth.port" });
    }
    if config.rate_limit.max_requests == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.max_requests" });
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.window_secs" });
    }
    if config.oauth.timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "oauth.timeout_secs" });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.request_secs" });
    }
    if config.security.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "security.max_body_bytes" });
    }

    if config.oauth.mode == OAuthMode::Supervised {
        if !is_loopback_host(&config.oauth.host) {
            errors.push(ValidationError::OAuthNotLoopback(config.oauth.host.clone()));
        }
        if config.oauth.command.trim().is_empty() {
            errors.push(ValidationError::EmptyCommand);
        }
        // A wildcard or loopback listener on the same port would fight the child for it.
        if config.oauth.port == config.listener.port && config.oauth.port != 0 {
            errors.push(ValidationError::PortCollision(config.oauth.port));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// True for `localhost` and any loopback IP literal.
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
