//! Error types of the batch middleware.
//!
//! Sub-request failures never surface here: they travel through the batch
//! outcome and the lifecycle hooks. [`WebBatchError`] covers the adapter's own
//! failures and the one fatal case, an `OnBatchEnd` hook error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_batch_core::BatchError;
use thiserror::Error;

/// Errors raised by the batch middleware.
#[derive(Error, Debug)]
pub enum WebBatchError {
    /// Collecting a sub-response body from the inner service failed or
    /// exceeded the configured limit.
    #[error("Failed to collect sub-response body (limit {limit} bytes): {source}")]
    SubResponseBody {
        /// Configured body limit
        limit: usize,
        /// Underlying body error
        #[source]
        source: axum::Error,
    },

    /// The batch could not produce a response.
    #[error("Batch request failed: {0}")]
    Fatal(#[from] BatchError),
}

impl IntoResponse for WebBatchError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Batch request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
