//! Resilience helpers.
//!
//! # Design Decisions
//! - The gateway never retries client requests; retries belong to the client
//!   or to the OAuth helper
//! - Restarts of the OAuth child are bounded and spaced with jittered backoff

pub mod backoff;

pub use backoff::restart_delay;
