//! Workflow error types

use thiserror::Error;

/// Errors that can occur while validating or executing a workflow
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("No handler registered for step type '{step_type}' (step '{step}')")]
    HandlerNotFound { step: String, step_type: String },

    #[error("Invalid parameters for step '{step}': {message}")]
    InvalidParams { step: String, message: String },

    #[error("Step execution failed in '{step}': {message}")]
    StepExecution {
        step: String,
        code: String,
        message: String,
    },

    #[error("Timeout in step '{step}' after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Workflow exceeded maximum execution duration of {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("Workflow exceeded maximum of {limit} executed steps")]
    StepLimitExceeded { limit: usize },

    #[error("Workflow execution was cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn step_not_found(id: impl Into<String>) -> Self {
        Self::StepNotFound(id.into())
    }

    pub fn handler_not_found(step: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            step: step.into(),
            step_type: step_type.into(),
        }
    }

    pub fn invalid_params(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn step_execution(
        step: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StepExecution {
            step: step.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn step_timeout(step: impl Into<String>, timeout_ms: u64) -> Self {
        Self::StepTimeout {
            step: step.into(),
            timeout_ms,
        }
    }

    pub fn timeout(limit_ms: u64) -> Self {
        Self::Timeout { limit_ms }
    }

    pub fn step_limit_exceeded(limit: usize) -> Self {
        Self::StepLimitExceeded { limit }
    }

    /// Stable machine-readable code recorded on the execution
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::StepNotFound(_) => "STEP_NOT_FOUND",
            Self::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            Self::InvalidParams { .. } => "INVALID_PARAMS",
            Self::StepExecution { .. } => "STEP_FAILED",
            Self::StepTimeout { .. } => "STEP_TIMEOUT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::StepLimitExceeded { .. } => "STEP_LIMIT_EXCEEDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Step the error is attributed to, if any
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepNotFound(step)
            | Self::HandlerNotFound { step, .. }
            | Self::InvalidParams { step, .. }
            | Self::StepExecution { step, .. }
            | Self::StepTimeout { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Errors that end the run with `timeout` status rather than `failed`
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StepLimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkflowError::step_execution("step1", "PROVIDER_ERROR", "Connection failed");
        assert_eq!(
            err.to_string(),
            "Step execution failed in 'step1': Connection failed"
        );

        let err = WorkflowError::step_timeout("slow-step", 5000);
        assert_eq!(err.to_string(), "Timeout in step 'slow-step' after 5000ms");

        let err = WorkflowError::handler_not_found("s1", "unknown");
        assert_eq!(
            err.to_string(),
            "No handler registered for step type 'unknown' (step 's1')"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WorkflowError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(WorkflowError::timeout(10).code(), "TIMEOUT");
        assert_eq!(WorkflowError::step_limit_exceeded(3).code(), "STEP_LIMIT_EXCEEDED");
        assert_eq!(WorkflowError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_step_id_attribution() {
        assert_eq!(
            WorkflowError::invalid_params("retrieve", "missing query").step_id(),
            Some("retrieve")
        );
        assert_eq!(WorkflowError::timeout(100).step_id(), None);
    }

    #[test]
    fn test_is_timeout() {
        assert!(WorkflowError::timeout(100).is_timeout());
        assert!(WorkflowError::step_limit_exceeded(5).is_timeout());
        assert!(!WorkflowError::step_timeout("s", 5).is_timeout());
        assert!(!WorkflowError::Cancelled.is_timeout());
    }
}
