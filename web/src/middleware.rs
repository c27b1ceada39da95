//! Tower layer serving batch requests in front of an axum service.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, ServiceExt, routing::get};
//! use http_batch_web::batch_layer;
//! use tower::Layer;
//!
//! let router = Router::new().route("/api/values/:id", get(get_value));
//! let app = batch_layer(BatchEventPipeline::new()).layer(router);
//!
//! axum::serve(listener, app.into_make_service()).await?;
//! ```
//!
//! # Flow
//!
//! 1. **Match** `POST` requests on the configured endpoint; all other requests
//!    reach the inner service untouched
//! 2. **Decode** the `multipart/mixed` body part by part
//! 3. **Dispatch** each sub-request to a clone of the inner service
//! 4. **Render** the collected sub-responses as one `multipart/mixed` reply
//!
//! The layer must wrap the router (`layer.layer(router)`), not be added with
//! `Router::layer`: the batch endpoint is not a route, so requests to it never
//! reach route-level middleware.

use crate::config::MiddlewareConfig;
use crate::error::WebBatchError;
use crate::handler::ServiceHandler;
use crate::response::BatchReply;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use http::header::HOST;
use http::Method;
use http_batch_core::{BatchEventPipeline, BatchExecutor, CancellationToken, OuterRequest};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Create a batch layer on the default endpoint with the given hooks.
#[must_use]
pub fn batch_layer(pipeline: BatchEventPipeline) -> BatchLayer {
    BatchLayer::new(MiddlewareConfig::default(), pipeline)
}

/// Layer installing [`BatchMiddleware`].
#[derive(Clone, Debug)]
pub struct BatchLayer {
    config: Arc<MiddlewareConfig>,
    executor: Arc<BatchExecutor>,
}

impl BatchLayer {
    /// Create a layer from configuration and hooks.
    #[must_use]
    pub fn new(config: MiddlewareConfig, pipeline: BatchEventPipeline) -> Self {
        let executor = BatchExecutor::new(config.batch.clone(), pipeline);
        Self {
            config: Arc::new(config),
            executor: Arc::new(executor),
        }
    }

    /// Middleware configuration.
    #[must_use]
    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    /// The executor shared by every service this layer produces.
    #[must_use]
    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }
}

impl<S> Layer<S> for BatchLayer {
    type Service = BatchMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BatchMiddleware {
            inner,
            config: Arc::clone(&self.config),
            executor: Arc::clone(&self.executor),
        }
    }
}

/// Middleware service answering batch requests.
#[derive(Clone, Debug)]
pub struct BatchMiddleware<S> {
    inner: S,
    config: Arc<MiddlewareConfig>,
    executor: Arc<BatchExecutor>,
}

impl<S> BatchMiddleware<S> {
    fn is_batch(&self, req: &Request) -> bool {
        req.method() == Method::POST && req.uri().path() == self.config.endpoint
    }
}

impl<S> Service<Request> for BatchMiddleware<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if !self.is_batch(&req) {
            return Box::pin(self.inner.call(req));
        }

        // Sub-requests run on a clone; the ready service stays with this instance.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limit = self.config.max_sub_response_bytes;
        let executor = Arc::clone(&self.executor);

        Box::pin(async move { Ok(serve_batch(&executor, limit, inner, req).await) })
    }
}

async fn serve_batch<S>(executor: &BatchExecutor, limit: usize, inner: S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    let (parts, body) = req.into_parts();
    let cancel = parts
        .extensions
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default();

    let handler = ServiceHandler::new(
        inner,
        parts.extensions,
        parts.headers.get(HOST).cloned(),
        limit,
    );
    let outer = OuterRequest::new(parts.method, parts.uri, parts.headers);
    let body = body.into_data_stream().map_err(io::Error::other);

    match executor
        .execute_with_cancellation(outer, body, &handler, cancel)
        .await
    {
        Ok(run) => BatchReply(run.render(executor.config())).into_response(),
        Err(err) => WebBatchError::from(err).into_response(),
    }
}
