//! # Lifecycle Error Types
//!
//! Structured error handling for the step engine using thiserror. The
//! taxonomy mirrors how the driver decides between retry, escalation to the
//! failed state, and silent no-ops: steps return these errors, the driver is
//! the only place that interprets them.

use thiserror::Error;

/// Errors produced by step execution and the surrounding driver machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Deterministic validation failure. Every violated rule is reported,
    /// not just the first one encountered. Not retryable as-is; requires a
    /// policy or configuration fix.
    #[error("validation failed: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    /// A transient failure in an external operation (snapshot creation,
    /// repository access). Retryable with backoff.
    #[error("transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// An internal precondition did not hold (e.g. a snapshot name that is
    /// already set would be overwritten). Indicates a logic defect upstream;
    /// the index is quarantined rather than retried.
    #[error("internal inconsistency: {0}")]
    InvariantViolation(String),

    /// A wait step exceeded its configured maximum wait duration.
    #[error("step {step} for index {index} timed out after {waited_secs}s")]
    WaitTimeout {
        index: String,
        step: String,
        waited_secs: u64,
    },

    /// The execution state references a step key that is not part of the
    /// policy's compiled chain.
    #[error("unknown step {key} for policy {policy}")]
    UnknownStep { policy: String, key: String },

    /// A date-math template could not be resolved.
    #[error("date math error in {expression}: {message}")]
    DateMath { expression: String, message: String },

    /// The persisted execution-state record is malformed.
    #[error("malformed execution state for index {index}: {message}")]
    State { index: String, message: String },

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    /// Whether the driver may automatically re-attempt the failed step.
    ///
    /// Validation failures and invariant violations need human intervention;
    /// concurrency conflicts never reach this classification because the
    /// driver absorbs them before an error is recorded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Transient { .. } | LifecycleError::WaitTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_violation() {
        let err = LifecycleError::Validation {
            violations: vec!["must be lowercase".into(), "must not contain '#'".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("must be lowercase"));
        assert!(msg.contains("must not contain '#'"));
    }

    #[test]
    fn retryability_classification() {
        assert!(LifecycleError::Transient {
            operation: "create-snapshot".into(),
            message: "repository unavailable".into(),
        }
        .is_retryable());
        assert!(!LifecycleError::Validation {
            violations: vec!["cannot be empty".into()],
        }
        .is_retryable());
        assert!(
            !LifecycleError::InvariantViolation("snapshot name already set".into()).is_retryable()
        );
    }
}
