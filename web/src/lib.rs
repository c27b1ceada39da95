//! Axum integration for HTTP batch requests.
//!
//! Mounts the `http-batch-core` executor in front of an axum service. A
//! `POST` to the batch endpoint carrying a `multipart/mixed` body is split into
//! sub-requests, each dispatched to the same service, and answered with one
//! `multipart/mixed` response.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         BatchMiddleware (tower)         │  ← endpoint match, cancellation
//! ├─────────────────────────────────────────┤
//! │         BatchExecutor (core)            │  ← parse, hooks, serialize
//! ├─────────────────────────────────────────┤
//! │         ServiceHandler                  │  ← inner service per sub-request
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, ServiceExt, routing::get};
//! use http_batch_core::BatchEventPipeline;
//! use http_batch_web::{BatchLayer, MiddlewareConfig};
//! use tower::Layer;
//!
//! let config = MiddlewareConfig::from_env()?;
//! let router = Router::new().route("/api/values/:id", get(get_value));
//! let app = BatchLayer::new(config, BatchEventPipeline::new()).layer(router);
//!
//! axum::serve(listener, app.into_make_service()).await?;
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod response;

pub use config::MiddlewareConfig;
pub use error::WebBatchError;
pub use handler::ServiceHandler;
pub use middleware::{BatchLayer, BatchMiddleware, batch_layer};
pub use response::BatchReply;
