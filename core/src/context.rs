//! Per-batch shared state threaded through every lifecycle hook.
//!
//! A [`BatchContext`] is created when a batch starts, handed by mutable
//! reference to each hook invocation of that batch, and discarded once
//! `OnBatchEnd` has run. Nothing in it is shared between batches.

use crate::error::{BatchError, BoxError};
use crate::response::BatchResponse;
use http::{HeaderMap, Method, Uri, header::CONTENT_TYPE};
use std::any::Any;
use std::sync::Arc;

/// Metadata of the incoming batch request.
#[derive(Debug, Clone)]
pub struct OuterRequest {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
}

impl OuterRequest {
    /// Create outer request metadata.
    #[must_use]
    pub const fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    /// A `POST /` request carrying only the given `Content-Type`.
    ///
    /// Convenient when the engine is driven without an HTTP server around it.
    #[must_use]
    pub fn with_content_type(content_type: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = content_type.parse() {
            headers.insert(CONTENT_TYPE, value);
        }
        Self::new(Method::POST, Uri::from_static("/"), headers)
    }

    /// The `Content-Type` header, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Shared, mutable state for one batch.
///
/// # Slots
///
/// - **state**: free-form value owned by the hooks; the engine never looks inside
/// - **abort**: stop after the current sub-request, without an error
/// - **exception**: stop after the current sub-request, with an error
/// - **handled**: a hook already shaped the outer response; skip default rendering
/// - **response**: the outer response being built
pub struct BatchContext {
    request: OuterRequest,
    state: Option<Box<dyn Any + Send + Sync>>,
    aborted: bool,
    abort_reason: Option<String>,
    exception: Option<Arc<BatchError>>,
    handled: bool,
    response: BatchResponse,
    current: Option<usize>,
    completed: usize,
}

impl BatchContext {
    /// Create the context for a batch.
    #[must_use]
    pub fn new(request: OuterRequest) -> Self {
        Self {
            request,
            state: None,
            aborted: false,
            abort_reason: None,
            exception: None,
            handled: false,
            response: BatchResponse::default(),
            current: None,
            completed: 0,
        }
    }

    /// The incoming batch request.
    #[must_use]
    pub const fn request(&self) -> &OuterRequest {
        &self.request
    }

    /// Store a value in the state slot, replacing any previous one.
    pub fn set_state<T: Any + Send + Sync>(&mut self, value: T) {
        self.state = Some(Box::new(value));
    }

    /// Borrow the state slot as `T`.
    #[must_use]
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.as_ref()?.downcast_ref()
    }

    /// Mutably borrow the state slot as `T`.
    pub fn state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.state.as_mut()?.downcast_mut()
    }

    /// Remove the state slot if it holds a `T`.
    pub fn take_state<T: Any>(&mut self) -> Option<T> {
        let boxed = self.state.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.state = Some(other);
                None
            }
        }
    }

    /// Stop the batch once the current sub-request is finished.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Stop the batch with a reason recorded in the outcome.
    pub fn abort_with(&mut self, reason: impl Into<String>) {
        self.aborted = true;
        self.abort_reason = Some(reason.into());
    }

    /// Whether a hook requested an abort.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The reason given to [`abort_with`](Self::abort_with).
    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Fail the batch with an error of the hook's choosing.
    ///
    /// The first exception recorded wins; later ones are ignored.
    pub fn set_exception(&mut self, error: impl Into<BoxError>) {
        self.fail(BatchError::Raised(error.into()));
    }

    /// The recorded exception, if any.
    #[must_use]
    pub fn exception(&self) -> Option<&BatchError> {
        self.exception.as_deref()
    }

    /// Whether an exception has been recorded.
    #[must_use]
    pub const fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Mark the outer response as already shaped by a hook.
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Set the handled flag.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    /// Whether a hook marked the outer response as handled.
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        self.handled
    }

    /// The outer response being built.
    #[must_use]
    pub const fn response(&self) -> &BatchResponse {
        &self.response
    }

    /// Mutable access to the outer response being built.
    pub fn response_mut(&mut self) -> &mut BatchResponse {
        &mut self.response
    }

    /// Zero-based index of the sub-request in flight.
    #[must_use]
    pub const fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Number of sub-responses produced so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    pub(crate) fn fail(&mut self, error: BatchError) {
        if self.exception.is_none() {
            self.exception = Some(Arc::new(error));
        }
    }

    pub(crate) fn exception_handle(&self) -> Option<Arc<BatchError>> {
        self.exception.clone()
    }

    pub(crate) const fn set_current(&mut self, index: Option<usize>) {
        self.current = index;
    }

    pub(crate) const fn set_completed(&mut self, completed: usize) {
        self.completed = completed;
    }

    pub(crate) fn into_response(self) -> BatchResponse {
        self.response
    }
}

impl std::fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchContext")
            .field("request", &self.request)
            .field("has_state", &self.state.is_some())
            .field("aborted", &self.aborted)
            .field("abort_reason", &self.abort_reason)
            .field("exception", &self.exception)
            .field("handled", &self.handled)
            .field("current", &self.current)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
