//! In-process delegation to an OAuth handler service.

use axum::{
    body::Body,
    http::{Request, Uri},
    response::{IntoResponse, Response},
    BoxError,
};
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::http::error::GatewayError;
use crate::oauth::OAuthBridge;

/// Calls an OAuth handler directly, without a network hop.
///
/// The handler sees the request in origin form (`/auth/...?query`), which is
/// the mount point it expects regardless of how the gateway was addressed.
#[derive(Clone)]
pub struct InProcessBridge<S> {
    service: S,
}

impl<S> InProcessBridge<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S, R> OAuthBridge for InProcessBridge<S>
where
    S: Service<Request<Body>, Response = R> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    R: IntoResponse + 'static,
{
    fn forward(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response, GatewayError>> {
        let service = self.service.clone();
        Box::pin(async move {
            let request = to_origin_form(request)?;
            match service.oneshot(request).await {
                Ok(response) => Ok(response.into_response()),
                Err(e) => {
                    let e: BoxError = e.into();
                    Err(GatewayError::InternalFault(e.to_string()))
                }
            }
        })
    }

    fn strategy(&self) -> &'static str {
        "in-process"
    }
}

fn to_origin_form(request: Request<Body>) -> Result<Request<Body>, GatewayError> {
    let (mut parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    parts.uri = path_and_query
        .parse::<Uri>()
        .map_err(|e| GatewayError::InternalFault(format!("invalid OAuth path: {}", e)))?;
    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::OriginalUri, http::StatusCode, routing::get, Router};
    use std::convert::Infallible;
    use tower::service_fn;

    #[tokio::test]
    async fn handler_sees_full_path_and_query() {
        let handler = Router::new().route(
            "/auth/{provider}",
            get(|OriginalUri(uri): OriginalUri| async move { uri.to_string() }),
        );
        let bridge = InProcessBridge::new(handler);

        let request = Request::builder()
            .uri("http://cms.example.com/auth/github?scope=repo")
            .body(Body::empty())
            .unwrap();
        let response = bridge.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"/auth/github?scope=repo");
    }

    #[tokio::test]
    async fn handler_failure_is_internal_fault() {
        let failing = service_fn(|_req: Request<Body>| async {
            Err::<Response, BoxError>("token exchange blew up".into())
        });
        let bridge = InProcessBridge::new(failing);

        let err = bridge
            .forward(Request::builder().uri("/callback").body(Body::empty()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InternalFault(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn handler_status_passes_through() {
        let teapot = service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(StatusCode::IM_A_TEAPOT)
        });
        let bridge = InProcessBridge::new(teapot);
        let response = bridge
            .forward(Request::builder().uri("/auth").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
