//! Reverse proxy to an OAuth helper listening on loopback.
//!
//! # Responsibilities
//! - Rewrite the request to `http://<oauth host>:<oauth port><path>?<query>`
//! - Strip hop-by-hop headers in both directions, add `X-Forwarded-*`
//! - Bound each call with a deadline: on the response head, then on every
//!   body chunk, so a helper stalling mid-body cannot pin the client
//! - Turn transport failures and timeouts into `UpstreamUnavailable`
//!
//! # Design Decisions
//! - Upstream HTTP responses, error statuses included, pass through untouched
//! - No retries: OAuth callbacks carry single-use codes
//! - Dropping the inbound request future (client went away) drops the
//!   upstream call with it

use std::io;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderMap, HeaderName, HeaderValue, Request, Uri, Version,
    },
    response::Response,
};
use futures_util::{future::BoxFuture, stream, StreamExt};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::OAuthConfig;
use crate::http::error::GatewayError;
use crate::http::request::peer_addr;
use crate::observability::metrics;
use crate::oauth::OAuthBridge;

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

/// Forwards OAuth traffic over HTTP to a separately running helper.
#[derive(Clone)]
pub struct ProxyBridge {
    client: Client<HttpConnector, Body>,
    authority: Authority,
    timeout: Duration,
}

impl ProxyBridge {
    pub fn new(config: &OAuthConfig) -> Result<Self, GatewayError> {
        let host = if config.host.contains(':') && !config.host.starts_with('[') {
            format!("[{}]", config.host)
        } else {
            config.host.clone()
        };
        let authority: Authority = format!("{}:{}", host, config.port)
            .parse()
            .map_err(|e| GatewayError::InternalFault(format!("invalid OAuth address: {}", e)))?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            authority,
            timeout: config.timeout(),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl OAuthBridge for ProxyBridge {
    fn forward(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response, GatewayError>> {
        let client = self.client.clone();
        let authority = self.authority.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let upstream_request = build_upstream_request(request, &authority)?;
            let uri = upstream_request.uri().clone();

            match tokio::time::timeout(timeout, client.request(upstream_request)).await {
                Ok(Ok(response)) => {
                    let (mut parts, body) = response.into_parts();
                    strip_hop_by_hop(&mut parts.headers);
                    tracing::debug!(upstream = %uri, status = %parts.status, "OAuth upstream responded");
                    Ok(Response::from_parts(
                        parts,
                        with_read_deadline(Body::new(body), timeout),
                    ))
                }
                Ok(Err(e)) => {
                    metrics::record_upstream_failure("transport");
                    Err(GatewayError::UpstreamUnavailable(format!("{}: {}", uri, e)))
                }
                Err(_) => {
                    metrics::record_upstream_failure("timeout");
                    Err(GatewayError::UpstreamUnavailable(format!(
                        "{}: no response within {:?}",
                        uri, timeout
                    )))
                }
            }
        })
    }

    fn strategy(&self) -> &'static str {
        "reverse-proxy"
    }
}

/// Fail the body when the upstream goes quiet for longer than `deadline`
/// between chunks. The connection to the client is then aborted.
fn with_read_deadline(body: Body, deadline: Duration) -> Body {
    let chunks = stream::unfold(Some(body.into_data_stream()), move |state| async move {
        let mut data = state?;
        match tokio::time::timeout(deadline, data.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(data))),
            Ok(Some(Err(e))) => {
                metrics::record_upstream_failure("body");
                Some((Err(io::Error::other(e)), None))
            }
            Ok(None) => None,
            Err(_) => {
                metrics::record_upstream_failure("body_timeout");
                tracing::warn!(?deadline, "OAuth upstream stalled mid-body");
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "upstream body stalled")),
                    None,
                ))
            }
        }
    });
    Body::from_stream(chunks)
}

/// Rewrite an inbound request for the upstream helper.
pub fn build_upstream_request(
    request: Request<Body>,
    authority: &Authority,
) -> Result<Request<Body>, GatewayError> {
    let peer = peer_addr(&request);
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::InternalFault(format!("invalid upstream URI: {}", e)))?;
    parts.version = Version::HTTP_11;

    let original_host = parts.headers.get(header::HOST).cloned();
    strip_hop_by_hop(&mut parts.headers);

    if let Some(peer) = peer {
        let forwarded = match parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }
    if let Some(host) = original_host {
        parts.headers.insert("x-forwarded-host", host);
    }
    if !parts.headers.contains_key("x-forwarded-proto") {
        parts
            .headers
            .insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }

    Ok(Request::from_parts(parts, body))
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
