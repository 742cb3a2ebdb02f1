//! Workflow domain entity

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WorkflowError;
use super::step_types::CONDITIONAL_STEP_TYPE;

/// Maximum length for workflow IDs
pub const MAX_ID_LENGTH: usize = 100;

/// Default loop guard when a definition does not declare `maxSteps`
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Conditional step parameter holding the expression
///
/// Like every param it is template-resolved before evaluation, so substituted
/// text is parsed as expression syntax. Conditions should reference data
/// through paths (`input.x == input.y`) rather than embedded placeholders.
pub const CONDITION_PARAM: &str = "condition";

/// Conditional step parameter naming the step taken when the condition holds
pub const ON_TRUE_PARAM: &str = "onTrue";

/// Conditional step parameter naming the step taken when the condition fails
pub const ON_FALSE_PARAM: &str = "onFalse";

/// Regex pattern for valid workflow IDs: alphanumeric, hyphens and underscores
static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

/// Validated workflow identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new validated workflow ID
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();
        validate_workflow_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a workflow ID string
pub fn validate_workflow_id(id: &str) -> Result<(), WorkflowError> {
    if id.is_empty() {
        return Err(WorkflowError::validation("Workflow ID cannot be empty"));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(WorkflowError::validation(format!(
            "Workflow ID exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(WorkflowError::validation(format!(
            "Invalid workflow ID '{}': must be alphanumeric with hyphens or underscores",
            id
        )));
    }

    Ok(())
}

/// Retry policy for a single step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; attempt `n` waits `base_delay_ms * n` before the next one
    #[serde(default)]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Effective number of attempts (zero is treated as one)
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-indexed), linear backoff
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A step within a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Unique id for this step within the workflow
    id: String,

    /// Step type, selects the handler in the registry
    #[serde(rename = "type")]
    step_type: String,

    /// Human-readable label
    #[serde(default)]
    label: String,

    /// Handler-specific parameters, may contain `{{...}}` placeholders
    #[serde(default = "empty_params")]
    params: Value,

    /// Linear next step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_step_id: Option<String>,

    /// Step to take after success (wins over `next_step_id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_success: Option<String>,

    /// Step to take after the step failed all attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_failure: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryPolicy>,

    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl WorkflowStep {
    /// Create a new workflow step
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            label: String::new(),
            params: empty_params(),
            next_step_id: None,
            on_success: None,
            on_failure: None,
            retry: None,
            timeout_ms: None,
        }
    }

    // Builder methods

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_next(mut self, step_id: impl Into<String>) -> Self {
        self.next_step_id = Some(step_id.into());
        self
    }

    pub fn with_on_success(mut self, step_id: impl Into<String>) -> Self {
        self.on_success = Some(step_id.into());
        self
    }

    pub fn with_on_failure(mut self, step_id: impl Into<String>) -> Self {
        self.on_failure = Some(step_id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn next_step_id(&self) -> Option<&str> {
        self.next_step_id.as_deref()
    }

    pub fn on_success(&self) -> Option<&str> {
        self.on_success.as_deref()
    }

    pub fn on_failure(&self) -> Option<&str> {
        self.on_failure.as_deref()
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn is_conditional(&self) -> bool {
        self.step_type == CONDITIONAL_STEP_TYPE
    }

    /// Branch targets declared in a conditional step's parameters
    pub fn branch_targets(&self) -> Vec<&str> {
        if !self.is_conditional() {
            return Vec::new();
        }

        [ON_TRUE_PARAM, ON_FALSE_PARAM]
            .iter()
            .filter_map(|key| self.params.get(*key).and_then(Value::as_str))
            .collect()
    }

    /// All step ids this step may hand control to, in edge order:
    /// linear, success, failure, then conditional branches
    pub fn outgoing_edges(&self) -> Vec<&str> {
        let mut edges: Vec<&str> = [
            self.next_step_id.as_deref(),
            self.on_success.as_deref(),
            self.on_failure.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();

        edges.extend(self.branch_targets());
        edges
    }
}

/// A workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier
    id: WorkflowId,

    /// Definition version
    #[serde(default = "default_version")]
    version: u32,

    /// Optional human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Step where execution begins
    entry_step_id: String,

    /// Workflow steps, unique by id
    #[serde(default)]
    steps: Vec<WorkflowStep>,

    /// Upper bound on declared steps and on steps executed per run
    #[serde(default = "default_max_steps")]
    max_steps: usize,

    /// Upper bound on wall-clock duration of a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_execution_duration_ms: Option<u64>,
}

fn default_version() -> u32 {
    1
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

impl Workflow {
    /// Create a new workflow
    pub fn new(id: WorkflowId, entry_step_id: impl Into<String>) -> Self {
        Self {
            id,
            version: default_version(),
            name: None,
            entry_step_id: entry_step_id.into(),
            steps: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            max_execution_duration_ms: None,
        }
    }

    /// Parse a workflow from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(json)
            .map_err(|e| WorkflowError::validation(format!("Invalid workflow JSON: {}", e)))
    }

    // Builder methods

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_execution_duration_ms(mut self, ms: u64) -> Self {
        self.max_execution_duration_ms = Some(ms);
        self
    }

    // Getters

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entry_step_id(&self) -> &str {
        &self.entry_step_id
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn max_execution_duration_ms(&self) -> Option<u64> {
        self.max_execution_duration_ms
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Get a step by id (first match when ids are duplicated)
    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn has_step(&self, id: &str) -> bool {
        self.get_step(id).is_some()
    }

    /// Steps keyed by id; the first declaration of a duplicated id wins
    pub fn step_index(&self) -> HashMap<&str, &WorkflowStep> {
        let mut index = HashMap::with_capacity(self.steps.len());
        for step in &self.steps {
            index.entry(step.id()).or_insert(step);
        }
        index
    }
}
