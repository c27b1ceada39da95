//! Ready-made [`BatchHooks`] for exercising the lifecycle.

use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_batch_core::pipeline::ready;
use http_batch_core::{
    BatchContext, BatchHooks, BatchOutcome, BoxError, HookFuture, HookPoint, SubRequest,
    SubResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-hook invocation counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookCountSnapshot {
    /// `OnBatchStart` invocations
    pub batch_start: usize,
    /// `OnSubRequestPreparation` invocations
    pub preparation: usize,
    /// `OnSubRequestExecuting` invocations
    pub executing: usize,
    /// `OnSubRequestExecuted` invocations
    pub executed: usize,
    /// `OnBatchEnd` invocations
    pub batch_end: usize,
}

impl HookCountSnapshot {
    /// Snapshot where every per-sub-request hook ran `sub_requests` times
    /// inside a single batch.
    #[must_use]
    pub const fn uniform(sub_requests: usize) -> Self {
        Self {
            batch_start: 1,
            preparation: sub_requests,
            executing: sub_requests,
            executed: sub_requests,
            batch_end: 1,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    batch_start: AtomicUsize,
    preparation: AtomicUsize,
    executing: AtomicUsize,
    executed: AtomicUsize,
    batch_end: AtomicUsize,
    outcomes: Mutex<Vec<(&'static str, usize)>>,
    paths: Mutex<Vec<String>>,
}

/// Counts every hook invocation.
///
/// Clones share counters, so keep one handle and register another.
///
/// # Example
///
/// ```
/// use http_batch_core::BatchEventPipeline;
/// use http_batch_testing::{CountingHooks, HookCountSnapshot};
///
/// let counts = CountingHooks::new();
/// let pipeline = BatchEventPipeline::new().with_hook(counts.clone());
///
/// assert_eq!(pipeline.len(), 1);
/// assert_eq!(counts.snapshot(), HookCountSnapshot::default());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CountingHooks {
    counters: Arc<Counters>,
}

impl CountingHooks {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counts.
    #[must_use]
    pub fn snapshot(&self) -> HookCountSnapshot {
        let c = &self.counters;
        HookCountSnapshot {
            batch_start: c.batch_start.load(Ordering::SeqCst),
            preparation: c.preparation.load(Ordering::SeqCst),
            executing: c.executing.load(Ordering::SeqCst),
            executed: c.executed.load(Ordering::SeqCst),
            batch_end: c.batch_end.load(Ordering::SeqCst),
        }
    }

    /// `(kind, sub-response count)` of every outcome seen by `OnBatchEnd`.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(&'static str, usize)> {
        self.counters
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Paths of the sub-requests that reached `OnSubRequestExecuting`, in order.
    #[must_use]
    pub fn executed_paths(&self) -> Vec<String> {
        self.counters
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BatchHooks for CountingHooks {
    fn on_batch_start<'a>(&'a self, _context: &'a mut BatchContext) -> HookFuture<'a> {
        self.counters.batch_start.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }

    fn on_sub_request_preparation<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a mut SubRequest,
    ) -> HookFuture<'a> {
        self.counters.preparation.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }

    fn on_sub_request_executing<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        request: &'a SubRequest,
    ) -> HookFuture<'a> {
        self.counters.executing.fetch_add(1, Ordering::SeqCst);
        self.counters
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.uri.path().to_string());
        ready(Ok(()))
    }

    fn on_sub_request_executed<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }

    fn on_batch_end<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        self.counters.batch_end.fetch_add(1, Ordering::SeqCst);
        self.counters
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((outcome.kind(), outcome.responses().len()));
        ready(Ok(()))
    }
}

/// Aborts the batch as soon as a sub-response is not `2xx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnFailureHooks;

impl BatchHooks for AbortOnFailureHooks {
    fn on_sub_request_executed<'a>(
        &'a self,
        context: &'a mut BatchContext,
        _request: &'a SubRequest,
        response: &'a SubResponse,
    ) -> HookFuture<'a> {
        if !response.is_success() {
            let index = context.current_index().unwrap_or_default();
            context.abort_with(format!(
                "sub-request {index} returned {}",
                response.status.as_u16()
            ));
        }
        ready(Ok(()))
    }
}

/// Returns an error on the `nth` (1-based) invocation of one lifecycle point.
#[derive(Debug)]
pub struct FailingHooks {
    point: HookPoint,
    nth: usize,
    calls: AtomicUsize,
}

impl FailingHooks {
    /// Fail on the `nth` call of `point`.
    #[must_use]
    pub const fn new(point: HookPoint, nth: usize) -> Self {
        Self {
            point,
            nth,
            calls: AtomicUsize::new(0),
        }
    }

    fn hit(&self, point: HookPoint) -> Result<(), BoxError> {
        if point != self.point {
            return Ok(());
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.nth {
            Err(format!("{point} hook failed on call {call}").into())
        } else {
            Ok(())
        }
    }
}

impl BatchHooks for FailingHooks {
    fn on_batch_start<'a>(&'a self, _context: &'a mut BatchContext) -> HookFuture<'a> {
        ready(self.hit(HookPoint::BatchStart))
    }

    fn on_sub_request_preparation<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a mut SubRequest,
    ) -> HookFuture<'a> {
        ready(self.hit(HookPoint::SubRequestPreparation))
    }

    fn on_sub_request_executing<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
    ) -> HookFuture<'a> {
        ready(self.hit(HookPoint::SubRequestExecuting))
    }

    fn on_sub_request_executed<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        ready(self.hit(HookPoint::SubRequestExecuted))
    }

    fn on_batch_end<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        ready(self.hit(HookPoint::BatchEnd))
    }
}

/// Renders aborted and failed batches itself and marks them handled.
///
/// The outer response becomes `status` with a `text/plain` body describing
/// what stopped the batch.
#[derive(Debug, Clone, Copy)]
pub struct HandledErrorHooks {
    status: StatusCode,
}

impl Default for HandledErrorHooks {
    fn default() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl HandledErrorHooks {
    /// Render stopped batches with `status`.
    #[must_use]
    pub const fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl BatchHooks for HandledErrorHooks {
    fn on_batch_end<'a>(
        &'a self,
        context: &'a mut BatchContext,
        outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        let message = match outcome {
            BatchOutcome::Failed { error, .. } => format!("batch failed: {error}"),
            BatchOutcome::Aborted { reason, .. } => format!("batch stopped: {reason}"),
            BatchOutcome::Completed(_) | BatchOutcome::Rejected(_) => return ready(Ok(())),
        };

        let response = context.response_mut();
        response.status = self.status;
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response.body = message.into();
        context.mark_handled();
        ready(Ok(()))
    }
}
