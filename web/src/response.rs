//! Outer batch response conversion.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http_batch_core::BatchResponse;

/// Newtype turning a [`BatchResponse`] into an axum [`Response`].
#[derive(Debug, Clone)]
pub struct BatchReply(pub BatchResponse);

impl From<BatchResponse> for BatchReply {
    fn from(response: BatchResponse) -> Self {
        Self(response)
    }
}

impl IntoResponse for BatchReply {
    fn into_response(self) -> Response {
        let BatchResponse {
            status,
            headers,
            body,
        } = self.0;
        (status, headers, Body::from(body)).into_response()
    }
}
