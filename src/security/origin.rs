//! Origin policy and CORS response headers.
//!
//! # Responsibilities
//! - Decide allow/deny from the `Origin` header and the operator allow-list
//! - Answer CORS preflights from allowed origins
//! - Mark allowed cross-origin responses with credentialed CORS headers
//!
//! # Design Decisions
//! - An empty allow-list disables the policy entirely (zero-config deployments
//!   stay open); it never means "deny all"
//! - A missing `Origin` is always allowed (same-origin navigation, curl, probes)
//! - Hostnames compare case-insensitively; scheme and port are not part of the match

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use url::Url;

use crate::http::error::GatewayError;

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Result of evaluating an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    Allow,
    Deny,
}

/// Immutable set of lowercase hostnames allowed as cross-origin callers.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    hosts: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Whether the policy is active at all.
    pub fn is_enabled(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn evaluate(&self, origin: Option<&str>) -> OriginDecision {
        if !self.is_enabled() {
            return OriginDecision::Allow;
        }
        let Some(origin) = origin else {
            return OriginDecision::Allow;
        };

        match Url::parse(origin).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
            Some(host) if self.hosts.contains(&host) => OriginDecision::Allow,
            _ => OriginDecision::Deny,
        }
    }
}

/// Middleware enforcing the origin policy.
pub async fn origin_middleware(
    State(allow_list): State<Arc<AllowList>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    if !allow_list.is_enabled() {
        return Ok(next.run(request).await);
    }

    let origin = match request.headers().get(header::ORIGIN) {
        Some(value) => match value.to_str() {
            Ok(s) => Some(s.to_string()),
            // Non-ASCII origin is malformed.
            Err(_) => return Err(GatewayError::ForbiddenOrigin),
        },
        None => None,
    };

    if allow_list.evaluate(origin.as_deref()) == OriginDecision::Deny {
        return Err(GatewayError::ForbiddenOrigin);
    }

    let Some(origin) = origin else {
        return Ok(next.run(request).await);
    };
    let origin_value = HeaderValue::from_str(&origin).map_err(|_| GatewayError::ForbiddenOrigin)?;

    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if is_preflight {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        if let Some(requested) = request.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        response
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));

    Ok(response)
}
