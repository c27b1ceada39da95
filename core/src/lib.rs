//! # HTTP Batch Core
//!
//! Execution engine for HTTP batch requests: one `multipart/mixed` request
//! carrying many nested HTTP requests, answered by one `multipart/mixed`
//! response carrying their responses.
//!
//! ## Components
//!
//! - **Parser** ([`parser`]): splits an envelope into [`SubRequest`]s, lazily,
//!   one part at a time.
//! - **Pipeline** ([`pipeline`]): ordered [`BatchHooks`] observing and steering
//!   the batch through five lifecycle points.
//! - **Executor** ([`executor`]): runs sub-requests strictly in order against a
//!   [`Handler`], honouring abort, exception and cancellation.
//! - **Serializer** ([`serializer`]): reassembles [`SubResponse`]s into a
//!   response envelope.
//!
//! The crate is transport agnostic: it speaks [`http`] types with [`bytes::Bytes`]
//! bodies. The `http-batch-web` crate mounts it in front of an axum service.
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_batch_core::{BatchExecutor, BoxError, OuterRequest};
//!
//! # tokio_test_block_on(async {
//! let envelope = "--b\r\n\
//!                 Content-Type: application/http\r\n\
//!                 \r\n\
//!                 GET /api/values/1 HTTP/1.1\r\n\
//!                 \r\n\
//!                 \r\n\
//!                 --b--\r\n";
//!
//! let handler = |_request: Request<Bytes>| async {
//!     Ok::<_, BoxError>(Response::new(Bytes::from_static(b"{\"id\":1}")))
//! };
//!
//! let executor = BatchExecutor::default();
//! let body = futures::stream::iter([Ok(Bytes::from_static(envelope.as_bytes()))]);
//! let run = executor
//!     .execute(OuterRequest::with_content_type("multipart/mixed; boundary=b"), body, &handler)
//!     .await?;
//!
//! assert!(run.outcome.is_completed());
//! let response = run.render(executor.config());
//! assert_eq!(response.status, http::StatusCode::OK);
//! # Ok::<(), http_batch_core::BatchError>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod message;
pub mod outcome;
pub mod parser;
pub mod pipeline;
pub mod response;
pub mod serializer;

pub use config::{BatchConfig, ConfigError, FailureBodyPolicy};
pub use context::{BatchContext, OuterRequest};
pub use error::{BatchError, BoxError, HookPoint, ParseError};
pub use executor::{BatchExecutor, Handler, HandlerFuture};
pub use message::{SubRequest, SubResponse};
pub use outcome::{AbortReason, BatchOutcome, BatchRun};
pub use parser::{
    EnvelopeCodec, EnvelopeMessage, SubRequestStream, parse_boundary, parse_request_envelope,
    parse_response_envelope, request_stream,
};
pub use pipeline::{BatchEventPipeline, BatchHooks, HookFuture};
pub use response::BatchResponse;
pub use serializer::{SerializedBatch, encode_responses, serialize_requests, serialize_responses};

/// Token accepted by [`BatchExecutor::execute_with_cancellation`].
pub use tokio_util::sync::CancellationToken;
