//! Gateway error taxonomy and the single place it becomes an HTTP response.
//!
//! # Responsibilities
//! - Name every failure the gatekeeping pipeline can raise
//! - Map each kind to a status code and a uniform `{"error": "..."}` body
//! - Log operational failures, keep routine rejections quiet
//!
//! # Design Decisions
//! - Components return `GatewayError` and never build error responses themselves
//! - `RateLimited` and `ForbiddenOrigin` are expected under hostile traffic and
//!   are logged at debug level to avoid log flooding
//! - Only the reverse-proxy bridge produces `UpstreamUnavailable`

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Body text returned with 502 when the OAuth helper cannot be reached.
pub const UPSTREAM_UNAVAILABLE_BODY: &str = "OAuth provider is not available";

/// Failure kinds raised by the gateway pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Cross-origin request from a host outside the allow-list.
    #[error("origin not allowed")]
    ForbiddenOrigin,

    /// Mutating request without a matching anti-forgery token.
    #[error("invalid anti-forgery token")]
    InvalidAntiForgeryToken,

    /// Client exceeded its request ceiling for the current window.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },

    /// OAuth helper unreachable, timed out or failed at the transport level.
    #[error("OAuth upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("not found")]
    NotFound,

    /// Request body exceeded the configured limit.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Anything else, including panics inside handlers.
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ForbiddenOrigin | GatewayError::InvalidAntiForgeryToken => {
                StatusCode::FORBIDDEN
            }
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InternalFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Never includes internal details.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::ForbiddenOrigin => "Forbidden",
            GatewayError::InvalidAntiForgeryToken => "Invalid CSRF token",
            GatewayError::RateLimited { .. } => "Too many requests, please try again later.",
            GatewayError::UpstreamUnavailable(_) => UPSTREAM_UNAVAILABLE_BODY,
            GatewayError::NotFound => "Not Found",
            GatewayError::PayloadTooLarge => "Payload Too Large",
            GatewayError::InternalFault(_) => "Internal Server Error",
        }
    }

    fn log(&self) {
        match self {
            GatewayError::UpstreamUnavailable(cause) => {
                tracing::error!(error = %cause, "OAuth proxy error");
            }
            GatewayError::InternalFault(cause) => {
                tracing::error!(error = %cause, "Unhandled error");
            }
            other => {
                tracing::debug!(kind = %other, status = %other.status(), "Request rejected");
            }
        }
    }
}

/// Uniform JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status();
        let message = self.public_message();

        match self {
            GatewayError::UpstreamUnavailable(_) => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                message,
            )
                .into_response(),
            GatewayError::RateLimited {
                limit,
                window_secs,
                retry_after_secs,
            } => {
                let mut response = (status, Json(ErrorBody { error: message })).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                if let Ok(policy) = HeaderValue::from_str(&format!("{};w={}", limit, window_secs)) {
                    headers.insert("ratelimit-policy", policy);
                }
                if let Ok(state) = HeaderValue::from_str(&format!(
                    "limit={}, remaining=0, reset={}",
                    limit, retry_after_secs
                )) {
                    headers.insert("ratelimit", state);
                }
                response
            }
            _ => (status, Json(ErrorBody { error: message })).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn forbidden_origin_is_json_403() {
        let response = GatewayError::ForbiddenOrigin.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_of(response).await, r#"{"error":"Forbidden"}"#);
    }

    #[tokio::test]
    async fn bad_token_is_distinct_403() {
        let response = GatewayError::InvalidAntiForgeryToken.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_of(response).await, r#"{"error":"Invalid CSRF token"}"#);
    }

    #[tokio::test]
    async fn upstream_unavailable_is_plain_502() {
        let response =
            GatewayError::UpstreamUnavailable("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(body_of(response).await, UPSTREAM_UNAVAILABLE_BODY);
    }

    #[tokio::test]
    async fn internal_fault_hides_cause() {
        let response = GatewayError::InternalFault("db password leaked".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await, r#"{"error":"Internal Server Error"}"#);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = GatewayError::RateLimited {
            limit: 600,
            window_secs: 60,
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(response.headers()["ratelimit-policy"], "600;w=60");
    }
}
