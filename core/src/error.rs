//! Error taxonomy for batch processing.
//!
//! Two layers of errors exist:
//!
//! - [`ParseError`]: everything that can go wrong while recognising or walking
//!   a `multipart/mixed` envelope. `InvalidContentType` and `MissingBoundary`
//!   reject the envelope before any lifecycle hook runs; `MalformedBody` and
//!   `Io` surface while parts are being decoded and fail the batch.
//! - [`BatchError`]: the batch-level failure carried in the context's exception
//!   slot and in [`BatchOutcome::Failed`](crate::BatchOutcome::Failed).

use std::fmt;
use thiserror::Error;

/// Error currency of hooks and handlers.
///
/// Matches `tower::BoxError` so services can be adapted without conversion.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while recognising or decoding a batch envelope.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The `Content-Type` is absent or is not `multipart/mixed`.
    #[error("Expected multipart/mixed content type, got '{0}'")]
    InvalidContentType(String),

    /// The `multipart/mixed` content type carries no usable `boundary` parameter.
    #[error("Missing or invalid boundary parameter in multipart/mixed content type")]
    MissingBoundary,

    /// The envelope was recognised but its body is corrupt.
    #[error("Malformed batch body at byte {offset}: {reason}")]
    MalformedBody {
        /// Absolute byte offset in the envelope where the offending construct starts
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// Reading the envelope body failed.
    #[error("Failed to read batch body: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Create a [`ParseError::MalformedBody`].
    #[must_use]
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedBody {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether this error rejects the envelope before the batch starts.
    ///
    /// Such errors map to `400 Bad Request` and never reach lifecycle hooks.
    #[must_use]
    pub const fn is_envelope_rejection(&self) -> bool {
        matches!(self, Self::InvalidContentType(_) | Self::MissingBoundary)
    }
}

/// The lifecycle point a hook error was raised at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// `OnBatchStart`
    BatchStart,
    /// `OnSubRequestPreparation`
    SubRequestPreparation,
    /// `OnSubRequestExecuting`
    SubRequestExecuting,
    /// `OnSubRequestExecuted`
    SubRequestExecuted,
    /// `OnBatchEnd`
    BatchEnd,
}

impl HookPoint {
    /// Stable name used in logs and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BatchStart => "batch_start",
            Self::SubRequestPreparation => "sub_request_preparation",
            Self::SubRequestExecuting => "sub_request_executing",
            Self::SubRequestExecuted => "sub_request_executed",
            Self::BatchEnd => "batch_end",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch-level failure.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The envelope body turned out to be corrupt while walking its parts.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The inner handler failed for a sub-request.
    #[error("Sub-request {index} failed: {source}")]
    Handler {
        /// Zero-based position of the sub-request in the envelope
        index: usize,
        /// Error returned by the handler
        #[source]
        source: BoxError,
    },

    /// A lifecycle hook returned an error.
    #[error("Hook {hook} failed: {source}")]
    Hook {
        /// Lifecycle point the hook was invoked at
        hook: HookPoint,
        /// Sub-request in flight, if any
        index: Option<usize>,
        /// Error returned by the hook
        #[source]
        source: BoxError,
    },

    /// A hook placed an exception on the context directly.
    #[error("Batch failed: {0}")]
    Raised(#[source] BoxError),
}

impl BatchError {
    /// Create a [`BatchError::Hook`].
    #[must_use]
    pub const fn hook(hook: HookPoint, index: Option<usize>, source: BoxError) -> Self {
        Self::Hook {
            hook,
            index,
            source,
        }
    }

    /// The sub-request this failure is attributed to, if any.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self {
            Self::Handler { index, .. } => Some(*index),
            Self::Hook { index, .. } => *index,
            Self::Parse(_) | Self::Raised(_) => None,
        }
    }
}
