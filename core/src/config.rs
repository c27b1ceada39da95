//! Batch execution configuration.
//!
//! # Example
//!
//! ```
//! use http_batch_core::config::{BatchConfig, FailureBodyPolicy};
//!
//! let config = BatchConfig::default().with_failure_body(FailureBodyPolicy::IncludeCompleted);
//! assert_eq!(config.failure_body, FailureBodyPolicy::IncludeCompleted);
//! ```
//!
//! [`BatchConfig::from_env`] reads `HTTP_BATCH_FAILURE_BODY`
//! (`empty` | `include-completed`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable for [`BatchConfig::failure_body`].
pub const FAILURE_BODY_VAR: &str = "HTTP_BATCH_FAILURE_BODY";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// What the outer response body contains when a batch is aborted or fails
/// and no hook handled the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureBodyPolicy {
    /// `500` with an empty body.
    #[default]
    Empty,
    /// `500` with a multipart body holding the sub-responses completed before the stop.
    IncludeCompleted,
}

impl FromStr for FailureBodyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" => Ok(Self::Empty),
            "include-completed" | "include_completed" => Ok(Self::IncludeCompleted),
            _ => Err(ConfigError::InvalidValue {
                var: FAILURE_BODY_VAR.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FailureBodyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::IncludeCompleted => write!(f, "include-completed"),
        }
    }
}

/// Batch execution configuration.
///
/// Defaults to [`FailureBodyPolicy::Empty`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Outer body policy for aborted or failed batches
    pub failure_body: FailureBodyPolicy,
}

impl BatchConfig {
    /// Set the failure body policy.
    #[must_use]
    pub const fn with_failure_body(mut self, policy: FailureBodyPolicy) -> Self {
        self.failure_body = policy;
        self
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(policy) = lookup(FAILURE_BODY_VAR) {
            config.failure_body = policy.parse()?;
        }
        Ok(config)
    }
}
