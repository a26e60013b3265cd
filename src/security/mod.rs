//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client fixed window, 429 before anything else)
//!     → origin.rs (allow-list check, CORS headers)
//!     → csrf.rs (anti-forgery verification where the guard requires it)
//!     → Pass to dispatch
//! Outgoing response:
//!     → headers.rs (hardening headers)
//! ```
//!
//! # Design Decisions
//! - Each check raises a `GatewayError`; none builds its own error response
//! - Rate limiting runs first so rejected traffic costs the least work

pub mod csrf;
pub mod headers;
pub mod origin;
pub mod rate_limit;

pub use csrf::CsrfProtection;
pub use origin::{AllowList, OriginDecision};
pub use rate_limit::RateLimiterState;
