//! Fixed-window rate limiting per client identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::http::error::GatewayError;
use crate::http::request::peer_addr;
use crate::observability::metrics;

/// Counter for one client within its current window.
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's window resets.
    pub reset_after: Duration,
}

/// Shared state for the rate limiter.
///
/// Windows are fixed: they open on a client's first request and close
/// `window` later, regardless of traffic in between.
pub struct RateLimiterState {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
    trust_proxy_hops: usize,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests: config.max_requests,
            window: config.window(),
            trust_proxy_hops: config.trust_proxy_hops,
        }
    }

    /// Count one request from `key` at `now`.
    pub fn check(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { count: 0, started: now });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window { count: 0, started: now };
        }

        entry.count = entry.count.saturating_add(1);
        let reset_after = self.window.saturating_sub(now.duration_since(entry.started));

        RateDecision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after,
        }
    }

    /// Drop every window that has expired. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resolve the client identity for a request.
    pub fn client_key(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
        client_identity(peer, headers, self.trust_proxy_hops)
    }
}

/// Resolve the client address, trusting at most `hops` reverse proxies.
///
/// Candidates are ordered nearest first: the socket peer, then the
/// `X-Forwarded-For` entries from right to left. Each trusted hop moves one
/// step further out; if the header runs out, the furthest entry wins.
pub fn client_identity(peer: Option<SocketAddr>, headers: &HeaderMap, hops: usize) -> String {
    let peer = peer
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if hops == 0 {
        return peer;
    }

    let mut chain = vec![peer];
    for value in headers.get_all("x-forwarded-for") {
        let Ok(value) = value.to_str() else { continue };
        let mut entries: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        entries.reverse();
        // Later header lines were appended by nearer proxies.
        chain.splice(1..1, entries);
    }

    let index = hops.min(chain.len() - 1);
    chain.swap_remove(index)
}

/// Middleware function for fixed-window rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let key = state.client_key(peer_addr(&request), request.headers());
    let decision = state.check(&key, Instant::now());
    let reset_secs = decision.reset_after.as_secs_f64().ceil() as u64;

    if !decision.allowed {
        metrics::record_rate_limited();
        return Err(GatewayError::RateLimited {
            limit: decision.limit,
            window_secs: state.window.as_secs(),
            retry_after_secs: reset_secs,
        });
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(policy) =
        HeaderValue::from_str(&format!("{};w={}", decision.limit, state.window.as_secs()))
    {
        headers.insert("ratelimit-policy", policy);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "limit={}, remaining={}, reset={}",
        decision.limit, decision.remaining, reset_secs
    )) {
        headers.insert("ratelimit", value);
    }
    Ok(response)
}

/// Periodically drop expired windows until `shutdown` fires.
pub async fn run_sweeper(state: Arc<RateLimiterState>, shutdown: crate::lifecycle::Shutdown) {
    let mut ticker = tokio::time::interval(state.window());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = state.sweep(Instant::now());
                if removed > 0 {
                    tracing::trace!(removed, remaining = state.tracked_clients(), "Expired rate limit windows swept");
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}
