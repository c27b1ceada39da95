//! Scripted inner handlers.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_batch_core::{BoxError, Handler, HandlerFuture};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Header carrying the path a [`ScriptedHandler`] response was produced for.
pub const SERVED_PATH_HEADER: &str = "x-served-path";

/// One sub-request as seen by a [`ScriptedHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Request method
    pub method: Method,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// Handler answering from a per-path script.
///
/// - Paths registered with [`status`](Self::status) answer with that status;
///   everything else answers `200 OK`.
/// - Paths registered with [`fail_on`](Self::fail_on) return a handler error.
/// - Request bodies are echoed back; bodiless requests get `"<METHOD> <path>"`.
/// - Every call is recorded in arrival order.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use http_batch_testing::ScriptedHandler;
///
/// let handler = ScriptedHandler::new()
///     .status("/missing", StatusCode::NOT_FOUND)
///     .fail_on("/broken");
///
/// assert_eq!(handler.call_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    statuses: HashMap<String, StatusCode>,
    failures: HashSet<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedHandler {
    /// Handler answering `200 OK` everywhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with `status`.
    #[must_use]
    pub fn status(mut self, path: impl Into<String>, status: StatusCode) -> Self {
        self.statuses.insert(path.into(), status);
        self
    }

    /// Fail every call to `path`.
    #[must_use]
    pub fn fail_on(mut self, path: impl Into<String>) -> Self {
        self.failures.insert(path.into());
        self
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Paths called so far, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.path).collect()
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn respond(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                method: parts.method.clone(),
                path: path.clone(),
                headers: parts.headers,
                body: body.clone(),
            });

        if self.failures.contains(&path) {
            return Err(format!("scripted failure for {path}"));
        }

        let body = if body.is_empty() {
            Bytes::from(format!("{} {path}", parts.method))
        } else {
            body
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.statuses.get(&path).copied().unwrap_or(StatusCode::OK);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if let Ok(value) = HeaderValue::from_str(&path) {
            headers.insert(HeaderName::from_static(SERVED_PATH_HEADER), value);
        }
        Ok(response)
    }
}

impl Handler for ScriptedHandler {
    fn call(&self, request: Request<Bytes>) -> HandlerFuture<'_> {
        let result: Result<_, BoxError> = self.respond(request).map_err(Into::into);
        Box::pin(async move { result })
    }
}
