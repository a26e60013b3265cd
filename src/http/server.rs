//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every gateway route
//! - Wire the gatekeeping pipeline and ambient middleware
//! - Dispatch OAuth paths to the bridge and everything else to assets
//! - Serve until shutdown, draining in-flight requests
//!
//! # Data Flow
//! ```text
//! request
//!     → SetRequestId → PropagateRequestId → Trace → security headers
//!     → metrics → CatchPanic → timeout → body limit
//!     → rate limiter → origin policy → CSRF guard
//!     → /healthz | /csrf-token | assets | OAuth bridge
//! ```

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::assets::AssetServer;
use crate::http::error::GatewayError;
use crate::http::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::oauth::OAuthBridge;
use crate::observability::metrics;
use crate::routing::MutationGuard;
use crate::security::csrf::{csrf_middleware, issue_token, CsrfProtection};
use crate::security::headers::apply_security_headers;
use crate::security::origin::{origin_middleware, AllowList};
use crate::security::rate_limit::{rate_limit_middleware, run_sweeper, RateLimiterState};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<MutationGuard>,
    pub csrf: Arc<CsrfProtection>,
    pub bridge: Arc<dyn OAuthBridge>,
    pub assets: Arc<AssetServer>,
}

/// HTTP front door of the gateway.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: AppState,
    allow_list: Arc<AllowList>,
    limiter: Option<Arc<RateLimiterState>>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, bridge: Arc<dyn OAuthBridge>) -> Self {
        let state = AppState {
            guard: Arc::new(MutationGuard::new()),
            csrf: Arc::new(CsrfProtection::new(
                config.is_production(),
                config.security.max_body_bytes,
            )),
            bridge,
            assets: Arc::new(AssetServer::new(&config.assets)),
        };

        let allow_list = Arc::new(AllowList::new(&config.security.allowed_origins));
        if !allow_list.is_enabled() {
            tracing::warn!("No allowed origins configured, origin policy disabled");
        }

        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiterState::new(&config.rate_limit)));

        Self {
            config: Arc::new(config),
            state,
            allow_list,
            limiter,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost-last, so the pipeline order reads bottom-up.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = &self.config;

        let mut router = Router::new()
            .route("/healthz", get(healthz))
            .route("/csrf-token", get(issue_token))
            .route("/decap-cms.js", get(bundle))
            .route("/decap-cms.js.map", get(source_map))
            .route("/config.yml", get(cms_config))
            .method_not_allowed_fallback(method_not_allowed)
            .fallback(dispatch)
            .layer(from_fn_with_state(self.state.clone(), csrf_middleware))
            .layer(from_fn_with_state(self.allow_list.clone(), origin_middleware));

        if let Some(limiter) = &self.limiter {
            router = router.layer(from_fn_with_state(limiter.clone(), rate_limit_middleware));
        }

        let mut router = router
            .layer(RequestBodyLimitLayer::new(config.security.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(from_fn(metrics::track_requests));

        // Outside the panic catcher, so a 500 from a panic is hardened and counted too.
        if config.security.headers {
            router = apply_security_headers(router);
        }

        router
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id(request).unwrap_or("-"),
                )
            }))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID.clone()))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID.clone(), MakeRequestUuidV4))
            .with_state(self.state.clone())
    }

    /// Run the server, accepting connections until `shutdown` fires.
    ///
    /// Returns once the listener is closed and in-flight requests finished.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            oauth = self.state.bridge.strategy(),
            environment = %self.config.environment,
            "Gateway listening"
        );

        if let Some(limiter) = &self.limiter {
            tokio::spawn(run_sweeper(limiter.clone(), shutdown.clone()));
        }

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Liveness probe. Never checks dependencies.
async fn healthz() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], "ok")
}

async fn bundle(State(state): State<AppState>, request: Request<Body>) -> Result<Response, GatewayError> {
    state.assets.bundle(request).await
}

async fn source_map(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    state.assets.source_map(request).await
}

async fn cms_config(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    state.assets.cms_config(request).await
}

/// A known path hit with the wrong method is just another miss.
async fn method_not_allowed() -> GatewayError {
    GatewayError::NotFound
}

/// OAuth prefixes go to the bridge; GET/HEAD elsewhere read the public dir.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Result<Response, GatewayError> {
    if state.guard.is_oauth(request.uri().path()) {
        tracing::debug!(
            path = %request.uri().path(),
            strategy = state.bridge.strategy(),
            "Forwarding to OAuth subsystem"
        );
        return state.bridge.forward(request).await;
    }

    if request.method() == Method::GET || request.method() == Method::HEAD {
        state.assets.public(request).await
    } else {
        Err(GatewayError::NotFound)
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    GatewayError::InternalFault(format!("handler panicked: {}", detail)).into_response()
}
