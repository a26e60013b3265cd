//! Request classification subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (method, path)
//!     → guard.rs (mutating? OAuth-owned?)
//!     → csrf middleware consults requires_verification()
//!     → dispatch sends OAuth-owned paths to the bridge
//! ```
//!
//! # Design Decisions
//! - Classification is a pure function, independent of the HTTP stack
//! - The same OAuth prefixes drive both CSRF exemption and dispatch

pub mod guard;
pub mod matcher;

pub use guard::{MutationGuard, RequestClass, OAUTH_PREFIXES};
pub use matcher::Matcher;
