//! Anti-forgery tokens bound to a secret cookie.
//!
//! The `_csrf` cookie carries a random secret. A token is
//! `<salt>-<base64url(sha256(salt "-" secret))>`, so any number of tokens can be
//! minted for one secret and verified without server-side storage.
//!
//! Submitted tokens are looked up, first match wins, in: the `_csrf` field of a
//! JSON or urlencoded body, the `_csrf` query parameter, then the
//! `csrf-token`, `xsrf-token`, `x-csrf-token` and `x-xsrf-token` headers.

use std::collections::HashMap;
use std::error::Error as StdError;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http_body_util::LengthLimitError;
use rand::{distributions::Alphanumeric, Rng, RngCore};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::http::error::GatewayError;
use crate::http::server::AppState;

pub const CSRF_COOKIE: &str = "_csrf";
pub const CSRF_FIELD: &str = "_csrf";
const TOKEN_HEADERS: [&str; 4] = ["csrf-token", "xsrf-token", "x-csrf-token", "x-xsrf-token"];
const SECRET_BYTES: usize = 18;
const SALT_LEN: usize = 8;

/// Issues and verifies anti-forgery tokens.
#[derive(Debug, Clone)]
pub struct CsrfProtection {
    secure_cookie: bool,
    body_limit: usize,
}

impl CsrfProtection {
    pub fn new(secure_cookie: bool, body_limit: usize) -> Self {
        Self {
            secure_cookie,
            body_limit,
        }
    }

    /// Fresh random secret for a new session cookie.
    pub fn generate_secret(&self) -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Mint a token for `secret`.
    pub fn create_token(&self, secret: &str) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        format!("{}-{}", salt, digest(&salt, secret))
    }

    /// Check `token` against `secret` in constant time.
    pub fn verify(&self, secret: &str, token: &str) -> bool {
        let Some((salt, mac)) = token.split_once('-') else {
            return false;
        };
        constant_time_eq(mac.as_bytes(), digest(salt, secret).as_bytes())
    }

    /// `Set-Cookie` value for `secret`.
    pub fn cookie(&self, secret: &str) -> String {
        let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", CSRF_COOKIE, secret);
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"-");
    hasher.update(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parse the `Cookie` header(s) into name/value pairs. First occurrence wins.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Some((name, val)) = pair.trim().split_once('=') {
                let val = val.trim().trim_matches('"');
                cookies
                    .entry(name.trim().to_string())
                    .or_insert_with(|| val.to_string());
            }
        }
    }
    cookies
}

fn token_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == CSRF_FIELD)
        .map(|(_, v)| v.into_owned())
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    TOKEN_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

fn token_from_body(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "application/json" => serde_json::from_slice::<serde_json::Value>(body)
            .ok()?
            .get(CSRF_FIELD)?
            .as_str()
            .map(str::to_string),
        "application/x-www-form-urlencoded" => url::form_urlencoded::parse(body)
            .find(|(k, _)| k == CSRF_FIELD)
            .map(|(_, v)| v.into_owned()),
        _ => None,
    }
}

/// Only an exceeded length limit is the client's 413; any other read failure is ours.
fn body_read_error(err: axum::Error) -> GatewayError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return GatewayError::PayloadTooLarge;
        }
        source = e.source();
    }
    GatewayError::InternalFault(format!("failed to read request body: {}", err))
}

fn inspects_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

/// Middleware applying anti-forgery verification where the guard requires it.
pub async fn csrf_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    if !state.guard.requires_verification(request.method(), request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let cookies = parse_cookies(request.headers());
    let secret = cookies.get(CSRF_COOKIE).cloned();

    // Body first, so a form field wins over query and headers.
    let (parts, body) = request.into_parts();
    let (body_token, body) = if inspects_body(&parts.headers) {
        let bytes = to_bytes(body, state.csrf.body_limit)
            .await
            .map_err(body_read_error)?;
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        (token_from_body(content_type, &bytes), Body::from(bytes))
    } else {
        (None, body)
    };

    let token = body_token
        .or_else(|| token_from_query(parts.uri.query()))
        .or_else(|| token_from_headers(&parts.headers));

    match (secret, token) {
        (Some(secret), Some(token)) if state.csrf.verify(&secret, &token) => {
            Ok(next.run(Request::from_parts(parts, body)).await)
        }
        _ => Err(GatewayError::InvalidAntiForgeryToken),
    }
}

/// `GET /csrf-token`: mint a token, setting the secret cookie when absent.
pub async fn issue_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let existing = parse_cookies(&headers)
        .remove(CSRF_COOKIE)
        .filter(|s| !s.is_empty());

    let (secret, set_cookie) = match existing {
        Some(secret) => (secret, None),
        None => {
            let secret = state.csrf.generate_secret();
            let cookie = state.csrf.cookie(&secret);
            (secret, Some(cookie))
        }
    };

    let token = state.csrf.create_token(&secret);
    let mut response = Json(json!({ "csrfToken": token })).into_response();
    if let Some(cookie) = set_cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
