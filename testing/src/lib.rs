//! # HTTP Batch Testing
//!
//! Testing utilities for the HTTP batch engine.
//!
//! This crate provides:
//! - [`EnvelopeBuilder`] and body stream helpers for hand-built envelopes
//! - Hook implementations that count, abort, fail or render ([`hooks`])
//! - [`ScriptedHandler`], an inner handler answering from a per-path script
//! - `proptest` strategies for sub-requests and sub-responses ([`strategies`])
//!
//! ## Example
//!
//! ```
//! use http_batch_core::{BatchEventPipeline, BatchExecutor, BatchConfig, OuterRequest};
//! use http_batch_testing::{body_stream, CountingHooks, EnvelopeBuilder, HookCountSnapshot, ScriptedHandler};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let counts = CountingHooks::new();
//! let executor = BatchExecutor::new(
//!     BatchConfig::default(),
//!     BatchEventPipeline::new().with_hook(counts.clone()),
//! );
//!
//! let envelope = EnvelopeBuilder::new().get("/a").get("/b");
//! let run = executor
//!     .execute(
//!         OuterRequest::with_content_type(&envelope.content_type()),
//!         body_stream(envelope.build()),
//!         &ScriptedHandler::new(),
//!     )
//!     .await
//!     .unwrap();
//!
//! assert!(run.outcome.is_completed());
//! assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(2));
//! # });
//! ```

pub mod envelope;
pub mod handlers;
pub mod hooks;
pub mod strategies;

pub use envelope::{
    DEFAULT_BOUNDARY, EnvelopeBuilder, body_stream, chunked_body_stream, failing_body_stream,
};
pub use handlers::{RecordedCall, SERVED_PATH_HEADER, ScriptedHandler};
pub use hooks::{
    AbortOnFailureHooks, CountingHooks, FailingHooks, HandledErrorHooks, HookCountSnapshot,
};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
