//! Lifecycle hooks and the pipeline that dispatches them.
//!
//! # Lifecycle
//!
//! ```text
//! OnBatchStart
//!   ├─ OnSubRequestPreparation   ┐
//!   ├─ OnSubRequestExecuting     │ once per sub-request, in envelope order
//!   ├─ (handler)                 │
//!   └─ OnSubRequestExecuted      ┘
//! OnBatchEnd                       exactly once, on every path
//! ```
//!
//! Hooks are invoked in registration order. At each lifecycle point the first
//! hook that returns an error stops dispatch to the hooks registered after it.

use crate::context::BatchContext;
use crate::error::BoxError;
use crate::message::{SubRequest, SubResponse};
use crate::outcome::BatchOutcome;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by every hook method.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;

/// A hook future that resolves immediately with `result`.
#[must_use]
pub fn ready<'a>(result: Result<(), BoxError>) -> HookFuture<'a> {
    Box::pin(std::future::ready(result))
}

/// Extension points observing and steering a batch.
///
/// Every method defaults to a no-op, so implementations override only the
/// points they care about. Returning an error from any method other than
/// [`on_batch_end`](Self::on_batch_end) fails the batch; an error from
/// `on_batch_end` is fatal to the request.
///
/// # Dyn Compatibility
///
/// Methods return [`HookFuture`] instead of being `async fn` so hooks can be
/// stored as `Arc<dyn BatchHooks>`.
///
/// # Example
///
/// ```
/// use http_batch_core::{BatchContext, BatchHooks, HookFuture, SubRequest, SubResponse};
///
/// struct AbortOnServerError;
///
/// impl BatchHooks for AbortOnServerError {
///     fn on_sub_request_executed<'a>(
///         &'a self,
///         context: &'a mut BatchContext,
///         _request: &'a SubRequest,
///         response: &'a SubResponse,
///     ) -> HookFuture<'a> {
///         Box::pin(async move {
///             if response.status.is_server_error() {
///                 context.abort();
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait BatchHooks: Send + Sync {
    /// Invoked once before any sub-request is decoded.
    fn on_batch_start<'a>(&'a self, _context: &'a mut BatchContext) -> HookFuture<'a> {
        ready(Ok(()))
    }

    /// Invoked before a sub-request is dispatched. The request may be rewritten.
    fn on_sub_request_preparation<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a mut SubRequest,
    ) -> HookFuture<'a> {
        ready(Ok(()))
    }

    /// Invoked immediately before the sub-request reaches the handler.
    fn on_sub_request_executing<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
    ) -> HookFuture<'a> {
        ready(Ok(()))
    }

    /// Invoked after the handler produced a response.
    fn on_sub_request_executed<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        ready(Ok(()))
    }

    /// Invoked exactly once with the batch outcome.
    ///
    /// Last chance to shape [`BatchContext::response_mut`] and to call
    /// [`BatchContext::mark_handled`].
    fn on_batch_end<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        ready(Ok(()))
    }
}

/// Ordered set of registered hooks.
///
/// Cloning is cheap; hooks are shared. A pipeline holds no per-batch state,
/// so one instance serves any number of concurrent batches.
#[derive(Clone, Default)]
pub struct BatchEventPipeline {
    hooks: Vec<Arc<dyn BatchHooks>>,
}

impl BatchEventPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    pub fn register(&mut self, hook: Arc<dyn BatchHooks>) {
        self.hooks.push(hook);
    }

    /// Append a hook, builder style.
    #[must_use]
    pub fn with_hook(mut self, hook: impl BatchHooks + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Dispatch `OnBatchStart`.
    ///
    /// # Errors
    ///
    /// Returns the first hook error.
    pub async fn batch_start(&self, context: &mut BatchContext) -> Result<(), BoxError> {
        for hook in &self.hooks {
            hook.on_batch_start(context).await?;
        }
        Ok(())
    }

    /// Dispatch `OnSubRequestPreparation`.
    ///
    /// # Errors
    ///
    /// Returns the first hook error.
    pub async fn sub_request_preparation(
        &self,
        context: &mut BatchContext,
        request: &mut SubRequest,
    ) -> Result<(), BoxError> {
        for hook in &self.hooks {
            hook.on_sub_request_preparation(context, request).await?;
        }
        Ok(())
    }

    /// Dispatch `OnSubRequestExecuting`.
    ///
    /// # Errors
    ///
    /// Returns the first hook error.
    pub async fn sub_request_executing(
        &self,
        context: &mut BatchContext,
        request: &SubRequest,
    ) -> Result<(), BoxError> {
        for hook in &self.hooks {
            hook.on_sub_request_executing(context, request).await?;
        }
        Ok(())
    }

    /// Dispatch `OnSubRequestExecuted`.
    ///
    /// # Errors
    ///
    /// Returns the first hook error.
    pub async fn sub_request_executed(
        &self,
        context: &mut BatchContext,
        request: &SubRequest,
        response: &SubResponse,
    ) -> Result<(), BoxError> {
        for hook in &self.hooks {
            hook.on_sub_request_executed(context, request, response).await?;
        }
        Ok(())
    }

    /// Dispatch `OnBatchEnd`.
    ///
    /// # Errors
    ///
    /// Returns the first hook error.
    pub async fn batch_end(
        &self,
        context: &mut BatchContext,
        outcome: &BatchOutcome,
    ) -> Result<(), BoxError> {
        for hook in &self.hooks {
            hook.on_batch_end(context, outcome).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchEventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEventPipeline")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::context::OuterRequest;
    use http::Method;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl BatchHooks for Recorder {
        fn on_batch_start<'a>(&'a self, _context: &'a mut BatchContext) -> HookFuture<'a> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                ready(Err(format!("{} failed", self.name).into()))
            } else {
                ready(Ok(()))
            }
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
            fail,
        }
    }

    fn context() -> BatchContext {
        BatchContext::new(OuterRequest::with_content_type("multipart/mixed; boundary=b"))
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = BatchEventPipeline::new()
            .with_hook(recorder("first", &log, false))
            .with_hook(recorder("second", &log, false));

        pipeline.batch_start(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_register_shares_hook_across_pipelines() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared: Arc<dyn BatchHooks> = Arc::new(recorder("shared", &log, false));

        let mut first = BatchEventPipeline::new();
        first.register(Arc::clone(&shared));
        let mut second = BatchEventPipeline::new().with_hook(recorder("own", &log, false));
        second.register(shared);

        first.batch_start(&mut context()).await.unwrap();
        second.batch_start(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["shared", "own", "shared"]);
    }

    #[tokio::test]
    async fn test_first_error_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = BatchEventPipeline::new()
            .with_hook(recorder("first", &log, true))
            .with_hook(recorder("second", &log, false));

        let err = pipeline.batch_start(&mut context()).await.unwrap_err();
        assert_eq!(err.to_string(), "first failed");
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_default_methods_are_noops() {
        struct Nothing;
        impl BatchHooks for Nothing {}

        let pipeline = BatchEventPipeline::new().with_hook(Nothing);
        let mut ctx = context();
        let mut request = SubRequest::new(Method::GET, "/".parse().unwrap());
        let response = SubResponse::new(http::StatusCode::OK);

        pipeline.batch_start(&mut ctx).await.unwrap();
        pipeline
            .sub_request_preparation(&mut ctx, &mut request)
            .await
            .unwrap();
        pipeline.sub_request_executing(&mut ctx, &request).await.unwrap();
        pipeline
            .sub_request_executed(&mut ctx, &request, &response)
            .await
            .unwrap();
        pipeline
            .batch_end(&mut ctx, &BatchOutcome::Completed(vec![]))
            .await
            .unwrap();
        assert!(!ctx.is_aborted());
    }
}
