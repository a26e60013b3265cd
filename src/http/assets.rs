//! Read-only static asset serving.
//!
//! # Responsibilities
//! - Serve the CMS bundle, its source map and the CMS YAML config
//! - Serve everything else from the public directory
//!
//! # Design Decisions
//! - Files are streamed unmodified by `tower_http::services::fs`, which also
//!   rejects `..` components
//! - A missing file surfaces as `GatewayError::NotFound` so the JSON error
//!   shape matches the rest of the gateway

use std::convert::Infallible;
use std::path::Path;

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{Request, StatusCode},
    response::Response,
    BoxError,
};
use tower::{Service, ServiceExt};
use tower_http::services::{ServeDir, ServeFile};

use crate::config::AssetConfig;
use crate::http::error::GatewayError;

#[derive(Debug, Clone)]
pub struct AssetServer {
    public: ServeDir,
    bundle: ServeFile,
    source_map: ServeFile,
    cms_config: ServeFile,
}

impl AssetServer {
    pub fn new(config: &AssetConfig) -> Self {
        let bundle_path = config.bundle_path();
        let cms_config_path = config.cms_config_path();
        tracing::debug!(
            bundle = %bundle_path.display(),
            cms_config = %cms_config_path.display(),
            public = %config.public_dir().display(),
            "Asset roots"
        );
        warn_if_missing(&bundle_path);
        warn_if_missing(&cms_config_path);

        Self {
            public: ServeDir::new(config.public_dir()),
            bundle: ServeFile::new(bundle_path),
            source_map: ServeFile::new(config.source_map_path()),
            cms_config: ServeFile::new(cms_config_path),
        }
    }

    pub async fn bundle(&self, request: Request<Body>) -> Result<Response, GatewayError> {
        serve(self.bundle.clone(), request).await
    }

    pub async fn source_map(&self, request: Request<Body>) -> Result<Response, GatewayError> {
        serve(self.source_map.clone(), request).await
    }

    pub async fn cms_config(&self, request: Request<Body>) -> Result<Response, GatewayError> {
        serve(self.cms_config.clone(), request).await
    }

    pub async fn public(&self, request: Request<Body>) -> Result<Response, GatewayError> {
        serve(self.public.clone(), request).await
    }
}

async fn serve<S, B>(service: S, request: Request<Body>) -> Result<Response, GatewayError>
where
    S: Service<Request<Body>, Response = Response<B>, Error = Infallible>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let response = match service.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    if response.status() == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound);
    }
    Ok(response.map(Body::new))
}

fn warn_if_missing(path: &Path) {
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "Asset file not found, requests for it will 404");
    }
}
