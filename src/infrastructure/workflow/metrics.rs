//! Workflow execution metrics
//!
//! Recorded through the `metrics` facade; a no-op unless the embedding process
//! installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::domain::{ExecutionStatus, StepStatus};

/// Record a finished run
pub fn record_workflow_execution(status: ExecutionStatus, duration: Duration) {
    let labels = [("status", status.as_str().to_string())];

    counter!("workflow_executions_total", &labels).increment(1);
    histogram!("workflow_execution_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record a finished step
pub fn record_step_execution(step_type: &str, status: StepStatus, duration: Duration) {
    let labels = [
        ("step_type", step_type.to_string()),
        ("status", status.as_str().to_string()),
    ];

    counter!("workflow_steps_total", &labels).increment(1);
    histogram!("workflow_step_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record a retry of a failed step attempt
pub fn record_step_retry(step_type: &str) {
    counter!("workflow_step_retries_total", "step_type" => step_type.to_string()).increment(1);
}
