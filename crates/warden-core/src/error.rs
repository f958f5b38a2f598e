//! Error taxonomy shared by every component boundary.
//!
//! Failures travel as values: the gateway and dispatcher embed a
//! [`WardenError`] in their result types, the lifecycle controller returns
//! `Result<_, WardenError>`. Nothing is raised across a public method.

use serde::{Deserialize, Serialize};

/// Typed failure carried in results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WardenError {
    #[error("security violation: {reason}")]
    SecurityViolation { reason: String },

    #[error("execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error(
        "circuit breaker open: {restart_count}/{max_restarts} restarts, retry in {retry_after_ms}ms"
    )]
    CircuitBreakerOpen {
        restart_count: u32,
        max_restarts: u32,
        retry_after_ms: u64,
    },

    #[error("validation error: {reason}")]
    ValidationError { reason: String },

    #[error("authentication required: {reason}")]
    AuthRequired { reason: String },

    #[error("rate limit exceeded for tool '{tool_id}': {max_calls} calls per {window_ms}ms")]
    RateLimitExceeded {
        tool_id: String,
        max_calls: u32,
        window_ms: u64,
    },

    #[error("tool not found: {tool_id}")]
    ToolNotFound { tool_id: String },

    #[error("unparseable decision: {reason}")]
    ParsingError { reason: String },

    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("sandbox error: {reason}")]
    Sandbox { reason: String },
}

impl WardenError {
    pub fn security(reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SecurityViolation { .. } => "security_violation",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::CircuitBreakerOpen { .. } => "circuit_breaker_open",
            Self::ValidationError { .. } => "validation_error",
            Self::AuthRequired { .. } => "auth_required",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ParsingError { .. } => "parsing_error",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Sandbox { .. } => "sandbox",
        }
    }

    /// Whether a caller may reasonably retry the same operation unchanged.
    ///
    /// Only timeouts qualify; no component retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionTimeout { .. })
    }
}

/// Result alias for operations that fail with a [`WardenError`].
pub type WardenResult<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let err = WardenError::security("path escapes workspace");
        assert!(err.to_string().contains("security violation"));
        assert!(err.to_string().contains("path escapes workspace"));

        let err = WardenError::ToolNotFound {
            tool_id: "nope".into(),
        };
        assert_eq!(err.to_string(), "tool not found: nope");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(WardenError::ExecutionTimeout { timeout_ms: 10 }.is_retryable());
        assert!(!WardenError::security("x").is_retryable());
        assert!(!WardenError::validation("x").is_retryable());
        assert!(!WardenError::CircuitBreakerOpen {
            restart_count: 2,
            max_restarts: 2,
            retry_after_ms: 100,
        }
        .is_retryable());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let err = WardenError::RateLimitExceeded {
            tool_id: "read_file".into(),
            max_calls: 5,
            window_ms: 1000,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rate_limit_exceeded");
        assert_eq!(json["max_calls"], 5);
        assert_eq!(err.kind(), "rate_limit_exceeded");
    }
}
