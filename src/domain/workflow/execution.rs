//! Execution records
//!
//! A [`WorkflowExecution`] is created per run and mutated only by the executor
//! driving that run. Once it reaches a terminal status it is read-only history:
//! every transition method refuses to leave a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::entity::{Workflow, WorkflowStep};
use super::error::WorkflowError;
use super::handler::{StepError, StepMetadata};

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one attempted step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one attempted step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    step_id: String,
    step_type: String,
    status: StepStatus,

    /// Params after template resolution
    input: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<StepMetadata>,

    started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,

    duration_ms: u64,

    /// Attempts beyond the first
    retry_count: u32,
}

impl StepExecution {
    /// Create a running record for a step
    pub fn start(step: &WorkflowStep) -> Self {
        Self {
            step_id: step.id().to_string(),
            step_type: step.step_type().to_string(),
            status: StepStatus::Running,
            input: step.params().clone(),
            output: None,
            error: None,
            error_code: None,
            metadata: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            retry_count: 0,
        }
    }

    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    pub fn complete(&mut self, output: Value, metadata: StepMetadata) {
        if self.finish(StepStatus::Completed) {
            self.output = Some(output);
            self.metadata = Some(metadata);
        }
    }

    pub fn fail(&mut self, error: &StepError) {
        if self.finish(StepStatus::Failed) {
            self.error = Some(error.message.clone());
            self.error_code = Some(error.code.clone());
        }
    }

    /// Mark a step that was interrupted before producing a result
    pub fn skip(&mut self, reason: impl Into<String>) {
        if self.finish(StepStatus::Skipped) {
            self.error = Some(reason.into());
        }
    }

    fn finish(&mut self, status: StepStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.duration_ms = elapsed_ms(self.started_at, now);
        self.completed_at = Some(now);
        true
    }

    // Getters

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn metadata(&self) -> Option<&StepMetadata> {
        self.metadata.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub steps_executed: u32,
    pub steps_failed: u32,
    pub retries: u32,
    pub retrieval_calls: u32,
    pub llm_calls: u32,
    pub external_calls: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub total_duration_ms: u64,
}

impl ExecutionMetrics {
    /// Accumulate the side-effect counters a handler reported
    pub fn record(&mut self, metadata: &StepMetadata) {
        self.retrieval_calls = self.retrieval_calls.saturating_add(metadata.retrieval_calls);
        self.llm_calls = self.llm_calls.saturating_add(metadata.llm_calls);
        self.external_calls = self.external_calls.saturating_add(metadata.external_calls);
        self.prompt_tokens = self.prompt_tokens.saturating_add(metadata.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(metadata.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(metadata.total_tokens);
    }
}

/// Terminal error of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl From<&WorkflowError> for ExecutionError {
    fn from(error: &WorkflowError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            step_id: error.step_id().map(str::to_string),
        }
    }
}

/// Record of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    id: String,
    workflow_id: String,
    workflow_version: u32,
    tenant_id: String,
    status: ExecutionStatus,
    input: Value,

    /// Output of the last completed step
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Value>,

    steps: Vec<StepExecution>,
    metrics: ExecutionMetrics,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ExecutionError>,

    created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a pending record for a run of `workflow`
    pub fn new(workflow: &Workflow, tenant_id: impl Into<String>, input: Value) -> Self {
        Self {
            id: format!("exec-{}", Uuid::new_v4()),
            workflow_id: workflow.id().to_string(),
            workflow_version: workflow.version(),
            tenant_id: tenant_id.into(),
            status: ExecutionStatus::Pending,
            input,
            output: None,
            steps: Vec::new(),
            metrics: ExecutionMetrics::default(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move from pending to running
    pub fn start(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Append a step record; ignored once the run is terminal
    pub fn push_step(&mut self, step: StepExecution) {
        if !self.status.is_terminal() {
            self.steps.push(step);
        }
    }

    /// The most recently appended step record, while it is still running
    pub fn current_step_mut(&mut self) -> Option<&mut StepExecution> {
        self.steps
            .last_mut()
            .filter(|step| step.status() == StepStatus::Running)
    }

    pub fn metrics_mut(&mut self) -> &mut ExecutionMetrics {
        &mut self.metrics
    }

    /// Finish normally with the output of the last completed step
    pub fn complete(&mut self) -> bool {
        let output = self.last_completed_output().cloned();
        if !self.finish(ExecutionStatus::Completed) {
            return false;
        }
        self.output = output;
        true
    }

    /// Finish with a terminal error; the status follows the error kind
    pub fn fail(&mut self, error: &WorkflowError) -> bool {
        let status = match error {
            WorkflowError::Cancelled => ExecutionStatus::Cancelled,
            e if e.is_timeout() => ExecutionStatus::Timeout,
            _ => ExecutionStatus::Failed,
        };
        if !self.finish(status) {
            return false;
        }
        self.error = Some(ExecutionError::from(error));
        true
    }

    fn finish(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.metrics.total_duration_ms = elapsed_ms(self.started_at.unwrap_or(self.created_at), now);
        true
    }

    pub fn last_completed_output(&self) -> Option<&Value> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.status() == StepStatus::Completed)
            .and_then(StepExecution::output)
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_version(&self) -> u32 {
        self.workflow_version
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn steps(&self) -> &[StepExecution] {
        &self.steps
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
