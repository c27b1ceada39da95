//! Adapter dispatching sub-requests to the wrapped axum service.

use crate::error::WebBatchError;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use http::header::{HOST, HeaderValue};
use http::Extensions;
use http_batch_core::{BoxError, Handler, HandlerFuture};
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};
use tower::{Service, ServiceExt};

/// Runs each sub-request through a clone of the inner service.
///
/// The synthesized request inherits the outer request's extensions, so
/// values inserted by upstream layers (authenticated identity, request IDs)
/// are visible to sub-request handlers. A sub-request without a `Host`
/// header inherits the outer one.
pub struct ServiceHandler<S> {
    service: Mutex<S>,
    extensions: Extensions,
    host: Option<HeaderValue>,
    limit: usize,
}

impl<S> ServiceHandler<S> {
    /// Wrap `service`, collecting sub-response bodies up to `limit` bytes.
    #[must_use]
    pub const fn new(
        service: S,
        extensions: Extensions,
        host: Option<HeaderValue>,
        limit: usize,
    ) -> Self {
        Self {
            service: Mutex::new(service),
            extensions,
            host,
            limit,
        }
    }

    fn synthesize(&self, request: http::Request<Bytes>) -> Request {
        let (mut parts, body) = request.into_parts();
        parts.extensions.extend(self.extensions.clone());
        if let Some(host) = &self.host {
            if !parts.headers.contains_key(HOST) {
                parts.headers.insert(HOST, host.clone());
            }
        }
        Request::from_parts(parts, Body::from(body))
    }
}

impl<S> Handler for ServiceHandler<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    fn call(&self, request: http::Request<Bytes>) -> HandlerFuture<'_> {
        let service = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let request = self.synthesize(request);
        let limit = self.limit;

        Box::pin(async move {
            let response = match service.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };

            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(body, limit)
                .await
                .map_err(|source| WebBatchError::SubResponseBody { limit, source })?;
            Ok::<_, BoxError>(http::Response::from_parts(parts, body))
        })
    }
}

impl<S> std::fmt::Debug for ServiceHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandler")
            .field("host", &self.host)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Extension, Router};
    use http::HeaderMap;

    #[derive(Clone)]
    struct Tenant(&'static str);

    fn router() -> Router {
        Router::new()
            .route(
                "/tenant",
                get(|Extension(tenant): Extension<Tenant>| async move { tenant.0 }),
            )
            .route(
                "/host",
                get(|headers: HeaderMap| async move {
                    headers
                        .get(HOST)
                        .and_then(|host| host.to_str().ok())
                        .unwrap_or("none")
                        .to_string()
                }),
            )
            .route("/large", get(|| async { "x".repeat(64) }))
    }

    fn handler(limit: usize) -> ServiceHandler<Router> {
        let mut extensions = Extensions::new();
        extensions.insert(Tenant("acme"));
        ServiceHandler::new(
            router(),
            extensions,
            Some(HeaderValue::from_static("batch.example")),
            limit,
        )
    }

    fn get_request(path: &str) -> http::Request<Bytes> {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_extensions_and_host_are_inherited() {
        let handler = handler(1024);

        let tenant = handler.call(get_request("/tenant")).await.unwrap();
        assert_eq!(tenant.body(), "acme");

        let host = handler.call(get_request("/host")).await.unwrap();
        assert_eq!(host.body(), "batch.example");

        let own_host = http::Request::get("/host")
            .header(HOST, "inner.example")
            .body(Bytes::new())
            .unwrap();
        let host = handler.call(own_host).await.unwrap();
        assert_eq!(host.body(), "inner.example");
    }

    #[tokio::test]
    async fn test_body_limit_is_enforced() {
        let err = handler(16).call(get_request("/large")).await.unwrap_err();
        assert!(err.to_string().contains("limit 16 bytes"));

        let ok = handler(64).call(get_request("/large")).await.unwrap();
        assert_eq!(ok.body().len(), 64);
    }
}
