//! Middleware configuration.
//!
//! | Variable                              | Field                          |
//! |---------------------------------------|--------------------------------|
//! | `HTTP_BATCH_ENDPOINT`                 | `endpoint`                     |
//! | `HTTP_BATCH_MAX_SUB_RESPONSE_BYTES`   | `max_sub_response_bytes`       |
//! | `HTTP_BATCH_FAILURE_BODY`             | `batch.failure_body`           |

use http_batch_core::{BatchConfig, ConfigError, FailureBodyPolicy};
use serde::{Deserialize, Serialize};

/// Environment variable for [`MiddlewareConfig::endpoint`].
pub const ENDPOINT_VAR: &str = "HTTP_BATCH_ENDPOINT";
/// Environment variable for [`MiddlewareConfig::max_sub_response_bytes`].
pub const MAX_SUB_RESPONSE_BYTES_VAR: &str = "HTTP_BATCH_MAX_SUB_RESPONSE_BYTES";

/// Configuration of the batch middleware.
///
/// # Default Values
///
/// - `endpoint`: `/api/batch`
/// - `max_sub_response_bytes`: 16 MiB
/// - `batch`: [`BatchConfig::default`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Path that accepts batch requests (matched exactly, `POST` only)
    pub endpoint: String,
    /// Largest sub-response body collected from the inner service
    pub max_sub_response_bytes: usize,
    /// Settings handed to the executor
    #[serde(flatten)]
    pub batch: BatchConfig,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            endpoint: "/api/batch".to_string(),
            max_sub_response_bytes: 16 * 1024 * 1024,
            batch: BatchConfig::default(),
        }
    }
}

impl MiddlewareConfig {
    /// Set the batch endpoint path.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the sub-response body limit.
    #[must_use]
    pub const fn with_max_sub_response_bytes(mut self, limit: usize) -> Self {
        self.max_sub_response_bytes = limit;
        self
    }

    /// Set the failure body policy.
    #[must_use]
    pub const fn with_failure_body(mut self, policy: FailureBodyPolicy) -> Self {
        self.batch.failure_body = policy;
        self
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            batch: BatchConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(endpoint) = lookup(ENDPOINT_VAR) {
            config.endpoint = endpoint;
        }
        if let Some(limit) = lookup(MAX_SUB_RESPONSE_BYTES_VAR) {
            config.max_sub_response_bytes =
                limit.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: MAX_SUB_RESPONSE_BYTES_VAR.to_string(),
                    value: limit.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        if self.max_sub_response_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_sub_response_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
