//! Terminal results of a batch and their default rendering.

use crate::config::{BatchConfig, FailureBodyPolicy};
use crate::error::{BatchError, ParseError};
use crate::message::SubResponse;
use crate::response::BatchResponse;
use crate::serializer::serialize_responses;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Why a batch stopped early without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A hook set the abort flag, optionally with a reason.
    Requested(Option<String>),
    /// The outer request was cancelled.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested(Some(reason)) => write!(f, "aborted by hook: {reason}"),
            Self::Requested(None) => write!(f, "aborted by hook"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The terminal result of a batch.
///
/// Sub-responses always appear in envelope order. When execution stops
/// early, exactly the sub-responses produced before the stop are kept.
#[derive(Debug)]
pub enum BatchOutcome {
    /// The envelope was not recognised; no hook ran.
    Rejected(ParseError),
    /// Every sub-request was executed.
    Completed(Vec<SubResponse>),
    /// A hook or cancellation stopped the batch.
    Aborted {
        /// Sub-responses produced before the stop
        responses: Vec<SubResponse>,
        /// Why the batch stopped
        reason: AbortReason,
    },
    /// A hook, the handler or the envelope body failed.
    Failed {
        /// Sub-responses produced before the failure
        responses: Vec<SubResponse>,
        /// The failure, shared with the context's exception slot
        error: Arc<BatchError>,
    },
}

impl BatchOutcome {
    /// The sub-responses carried by this outcome.
    #[must_use]
    pub fn responses(&self) -> &[SubResponse] {
        match self {
            Self::Rejected(_) => &[],
            Self::Completed(responses)
            | Self::Aborted { responses, .. }
            | Self::Failed { responses, .. } => responses,
        }
    }

    /// Whether every sub-request ran.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the batch was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Whether the batch failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the envelope was rejected before the batch started.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The failure, for [`BatchOutcome::Failed`].
    #[must_use]
    pub fn error(&self) -> Option<&BatchError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Completed(_) => "completed",
            Self::Aborted { .. } => "aborted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Everything [`BatchExecutor::execute`](crate::BatchExecutor::execute) produces.
#[derive(Debug)]
pub struct BatchRun {
    /// How the batch ended
    pub outcome: BatchOutcome,
    /// The outer response as left by the hooks
    pub response: BatchResponse,
    /// Whether a hook marked the response as handled
    pub handled: bool,
}

impl BatchRun {
    /// Apply default rendering unless a hook handled the response.
    ///
    /// | Outcome               | Status | Body                                   |
    /// |-----------------------|--------|----------------------------------------|
    /// | `Rejected`            | 400    | empty                                  |
    /// | `Completed`           | 200    | multipart envelope of all responses    |
    /// | `Aborted` / `Failed`  | 500    | per [`FailureBodyPolicy`]              |
    ///
    /// Headers hooks placed on the response are kept; status, content type and
    /// body are overwritten.
    #[must_use]
    pub fn render(self, config: &BatchConfig) -> BatchResponse {
        if self.handled {
            return self.response;
        }

        let mut response = self.response;
        response.headers.remove(http::header::CONTENT_TYPE);
        response.body = bytes::Bytes::new();

        match &self.outcome {
            BatchOutcome::Rejected(_) => {
                response.status = StatusCode::BAD_REQUEST;
            }
            BatchOutcome::Completed(responses) => {
                response.status = StatusCode::OK;
                write_envelope(&mut response, responses);
            }
            BatchOutcome::Aborted { responses, .. } | BatchOutcome::Failed { responses, .. } => {
                response.status = StatusCode::INTERNAL_SERVER_ERROR;
                if config.failure_body == FailureBodyPolicy::IncludeCompleted {
                    write_envelope(&mut response, responses);
                }
            }
        }

        response
    }
}

fn write_envelope(response: &mut BatchResponse, responses: &[SubResponse]) {
    let serialized = serialize_responses(responses);
    response.set_content_type(&serialized.content_type());
    response.body = serialized.into_body();
}
