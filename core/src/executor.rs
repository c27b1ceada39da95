//! Sequential batch execution.
//!
//! [`BatchExecutor`] walks an envelope one part at a time, driving each
//! sub-request through the lifecycle hooks and the inner [`Handler`]:
//!
//! 1. Validate the `Content-Type`. An unrecognised envelope is
//!    [`BatchOutcome::Rejected`] and no hook runs.
//! 2. `OnBatchStart`.
//! 3. For each part, in order: decode, `OnSubRequestPreparation`,
//!    `OnSubRequestExecuting`, handler, `OnSubRequestExecuted`.
//!    The loop stops before decoding the next part once an abort, an
//!    exception or a cancellation is observed.
//! 4. `OnBatchEnd`, exactly once.
//!
//! Sub-requests never run concurrently. Unread parts are never decoded and
//! the body stream is dropped as soon as the loop ends.

use crate::config::BatchConfig;
use crate::context::{BatchContext, OuterRequest};
use crate::error::{BatchError, BoxError, HookPoint};
use crate::message::{SubRequest, SubResponse};
use crate::outcome::{AbortReason, BatchOutcome, BatchRun};
use crate::parser::{SubRequestStream, parse_boundary, request_stream};
use crate::pipeline::BatchEventPipeline;
use crate::response::BatchResponse;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{Request, Response};
use std::future::Future;
use std::io;
use std::pin::{Pin, pin};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Future returned by [`Handler::call`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response<Bytes>, BoxError>> + Send + 'a>>;

/// The inner pipeline that services each sub-request.
///
/// Implemented for any `Fn(Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>, BoxError>>`.
pub trait Handler: Send + Sync {
    /// Service one synthesized sub-request.
    fn call(&self, request: Request<Bytes>) -> HandlerFuture<'_>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, BoxError>> + Send + 'static,
{
    fn call(&self, request: Request<Bytes>) -> HandlerFuture<'_> {
        Box::pin(self(request))
    }
}

/// Runs batches against a hook pipeline.
///
/// Holds no per-batch state; share one executor across concurrent batches.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
    pipeline: BatchEventPipeline,
}

impl BatchExecutor {
    /// Create an executor.
    #[must_use]
    pub const fn new(config: BatchConfig, pipeline: BatchEventPipeline) -> Self {
        Self { config, pipeline }
    }

    /// Executor configuration.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Registered hooks.
    #[must_use]
    pub const fn pipeline(&self) -> &BatchEventPipeline {
        &self.pipeline
    }

    /// Execute a batch.
    ///
    /// `body` is the envelope as a stream of chunks; it is decoded lazily.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Hook`] when an `OnBatchEnd` hook fails. Every other
    /// failure is reported through [`BatchOutcome`].
    pub async fn execute<S, H>(
        &self,
        outer: OuterRequest,
        body: S,
        handler: &H,
    ) -> Result<BatchRun, BatchError>
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send,
        H: Handler + ?Sized,
    {
        self.execute_with_cancellation(outer, body, handler, CancellationToken::new())
            .await
    }

    /// Execute a batch that stops early once `cancel` fires.
    ///
    /// Cancellation is observed between sub-requests; a sub-request already
    /// handed to the handler always runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Hook`] when an `OnBatchEnd` hook fails.
    pub async fn execute_with_cancellation<S, H>(
        &self,
        outer: OuterRequest,
        body: S,
        handler: &H,
        cancel: CancellationToken,
    ) -> Result<BatchRun, BatchError>
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send,
        H: Handler + ?Sized,
    {
        let span = tracing::info_span!(
            "http_batch",
            method = %outer.method,
            uri = %outer.uri,
            boundary = tracing::field::Empty,
        );
        self.run(outer, body, handler, &cancel).instrument(span).await
    }

    async fn run<S, H>(
        &self,
        outer: OuterRequest,
        body: S,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<BatchRun, BatchError>
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send,
        H: Handler + ?Sized,
    {
        let boundary = match parse_boundary(outer.content_type()) {
            Ok(boundary) => boundary,
            Err(error) => {
                tracing::warn!(error = %error, "Rejected batch envelope");
                metrics::counter!("http_batch.batches", "outcome" => "rejected").increment(1);
                return Ok(BatchRun {
                    outcome: BatchOutcome::Rejected(error),
                    response: BatchResponse::default(),
                    handled: false,
                });
            }
        };
        tracing::Span::current().record("boundary", boundary.as_str());

        let mut context = BatchContext::new(outer);
        let mut responses = Vec::new();
        let mut cancelled = false;

        match self.pipeline.batch_start(&mut context).await {
            Ok(()) => {
                cancelled = self
                    .drive(
                        &mut context,
                        request_stream(&boundary, body),
                        handler,
                        cancel,
                        &mut responses,
                    )
                    .await;
            }
            Err(source) => {
                tracing::warn!(error = %source, "OnBatchStart hook failed");
                context.fail(BatchError::hook(HookPoint::BatchStart, None, source));
                drop(body);
            }
        }
        context.set_current(None);

        let outcome = if let Some(error) = context.exception_handle() {
            tracing::warn!(error = %error, completed = responses.len(), "Batch failed");
            BatchOutcome::Failed { responses, error }
        } else if cancelled {
            tracing::warn!(completed = responses.len(), "Batch cancelled");
            BatchOutcome::Aborted {
                responses,
                reason: AbortReason::Cancelled,
            }
        } else if context.is_aborted() {
            let reason = AbortReason::Requested(context.abort_reason().map(str::to_owned));
            tracing::warn!(reason = %reason, completed = responses.len(), "Batch aborted");
            BatchOutcome::Aborted { responses, reason }
        } else {
            tracing::debug!(completed = responses.len(), "Batch completed");
            BatchOutcome::Completed(responses)
        };

        if let Err(source) = self.pipeline.batch_end(&mut context, &outcome).await {
            let error = BatchError::hook(HookPoint::BatchEnd, None, source);
            tracing::error!(error = %error, outcome = outcome.kind(), "OnBatchEnd hook failed");
            metrics::counter!("http_batch.batches", "outcome" => "fatal").increment(1);
            return Err(error);
        }

        metrics::counter!("http_batch.batches", "outcome" => outcome.kind()).increment(1);
        metrics::histogram!("http_batch.parts").record(
            u32::try_from(outcome.responses().len()).map_or(f64::from(u32::MAX), f64::from),
        );

        let handled = context.is_handled();
        Ok(BatchRun {
            outcome,
            response: context.into_response(),
            handled,
        })
    }

    /// Process parts until the envelope ends or the batch stops.
    ///
    /// Returns `true` when the loop ended because of cancellation.
    async fn drive<S, H>(
        &self,
        context: &mut BatchContext,
        parts: SubRequestStream<S>,
        handler: &H,
        cancel: &CancellationToken,
        responses: &mut Vec<SubResponse>,
    ) -> bool
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send,
        H: Handler + ?Sized,
    {
        let mut parts = pin!(parts);
        let mut index = 0;

        loop {
            if context.has_exception() || context.is_aborted() {
                return false;
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return true,
                next = parts.next() => next,
            };

            let mut request = match next {
                None => return false,
                Some(Ok(request)) => request,
                Some(Err(error)) => {
                    tracing::warn!(index, error = %error, "Failed to decode batch part");
                    context.fail(BatchError::Parse(error));
                    return false;
                }
            };

            metrics::counter!("http_batch.sub_requests").increment(1);
            context.set_current(Some(index));

            if let Some(response) = self.run_one(context, index, &mut request, handler).await {
                responses.push(response);
                context.set_completed(responses.len());
            }
            index += 1;
        }
    }

    /// Drive one sub-request through its hooks and the handler.
    ///
    /// Returns the response when it belongs in the outcome.
    async fn run_one<H>(
        &self,
        context: &mut BatchContext,
        index: usize,
        request: &mut SubRequest,
        handler: &H,
    ) -> Option<SubResponse>
    where
        H: Handler + ?Sized,
    {
        if let Err(source) = self
            .pipeline
            .sub_request_preparation(context, request)
            .await
        {
            hook_failed(context, HookPoint::SubRequestPreparation, index, source);
            return None;
        }
        if stopped(context) {
            return None;
        }

        if let Err(source) = self.pipeline.sub_request_executing(context, request).await {
            hook_failed(context, HookPoint::SubRequestExecuting, index, source);
            return None;
        }
        if stopped(context) {
            return None;
        }

        tracing::debug!(
            index,
            method = %request.method,
            uri = %request.uri,
            "Dispatching sub-request"
        );

        let response = match handler.call(request.clone().into_http()).await {
            Ok(response) => SubResponse::from(response),
            Err(source) => {
                tracing::warn!(index, error = %source, "Sub-request handler failed");
                context.fail(BatchError::Handler { index, source });
                return None;
            }
        };

        tracing::debug!(index, status = response.status.as_u16(), "Sub-request completed");

        if let Err(source) = self
            .pipeline
            .sub_request_executed(context, request, &response)
            .await
        {
            // The handler already ran; its response stays in the outcome.
            hook_failed(context, HookPoint::SubRequestExecuted, index, source);
        }

        Some(response)
    }
}

const fn stopped(context: &BatchContext) -> bool {
    context.has_exception() || context.is_aborted()
}

fn hook_failed(context: &mut BatchContext, hook: HookPoint, index: usize, source: BoxError) {
    tracing::warn!(index, hook = hook.as_str(), error = %source, "Lifecycle hook failed");
    context.fail(BatchError::hook(hook, Some(index), source));
}
