//! Write-mutation guard: decides which requests need anti-forgery verification.
//!
//! A request is checked iff it is mutating (POST, PUT, PATCH, DELETE) and is
//! not addressed to the OAuth entry points. Those endpoints are reached through
//! a provider-driven redirect flow, so the browser cannot carry a page-issued
//! token there.

use axum::http::Method;

use crate::routing::matcher::{AnyMatcher, Matcher, MethodMatcher, PathPrefixMatcher};

/// Path prefixes owned by the OAuth subsystem.
pub const OAUTH_PREFIXES: [&str; 2] = ["/auth", "/callback"];

/// How the guard sees a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestClass {
    pub mutating: bool,
    pub oauth: bool,
}

impl RequestClass {
    pub fn requires_verification(&self) -> bool {
        self.mutating && !self.oauth
    }
}

#[derive(Debug)]
pub struct MutationGuard {
    mutating: MethodMatcher,
    oauth: AnyMatcher,
}

impl MutationGuard {
    pub fn new() -> Self {
        Self {
            mutating: MethodMatcher::new([Method::POST, Method::PUT, Method::PATCH, Method::DELETE]),
            oauth: AnyMatcher::new(
                OAUTH_PREFIXES
                    .iter()
                    .map(|p| Box::new(PathPrefixMatcher::new(*p)) as Box<dyn Matcher>)
                    .collect(),
            ),
        }
    }

    pub fn classify(&self, method: &Method, path: &str) -> RequestClass {
        RequestClass {
            mutating: self.mutating.matches(method, path),
            oauth: self.oauth.matches(method, path),
        }
    }

    /// True when the request must present a valid anti-forgery token.
    pub fn requires_verification(&self, method: &Method, path: &str) -> bool {
        self.classify(method, path).requires_verification()
    }

    /// True when the request belongs to the OAuth subsystem.
    pub fn is_oauth(&self, path: &str) -> bool {
        self.oauth.matches(&Method::GET, path)
    }
}

impl Default for MutationGuard {
    fn default() -> Self {
        Self::new()
    }
}
