//! Workflow execution context
//!
//! Holds the three roots visible to templates and expressions:
//! - `input` - payload supplied by the caller, read-only
//! - `steps` - `{output, metadata}` of every finished step, keyed by step id
//! - `context` - execution-scoped constants (workflow, execution and tenant ids)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Execution-scoped constants exposed under the `context` root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionScope {
    pub workflow_id: String,
    pub execution_id: String,
    pub tenant_id: String,
}

impl ExecutionScope {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Evaluation state of one workflow execution
///
/// Owned by a single run. Handlers only ever see `&TemplateContext`; the
/// executor is the sole writer.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    input: Value,

    /// Always a JSON object
    steps: Value,

    scope: ExecutionScope,
    scope_value: Value,
}

impl TemplateContext {
    /// Create a new context with the given input and scope
    pub fn new(input: Value, scope: &ExecutionScope) -> Self {
        Self {
            input,
            steps: Value::Object(Map::new()),
            scope: scope.clone(),
            scope_value: scope.to_value(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    /// Entry recorded for a step (`{output, metadata}` or `{output, error}`)
    pub fn step(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id)
    }

    /// Output recorded for a step
    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step(step_id).and_then(|entry| entry.get("output"))
    }

    pub fn step_count(&self) -> usize {
        self.steps.as_object().map_or(0, Map::len)
    }

    /// Record the output and metadata of a completed step
    pub fn record_step(&mut self, step_id: impl Into<String>, output: Value, metadata: Value) {
        self.insert_step(
            step_id.into(),
            json!({
                "output": output,
                "metadata": metadata,
            }),
        );
    }

    /// Record a failed step so failure-edge targets can inspect the error
    pub fn record_failure(&mut self, step_id: impl Into<String>, error: Value) {
        self.insert_step(
            step_id.into(),
            json!({
                "output": Value::Null,
                "error": error,
            }),
        );
    }

    fn insert_step(&mut self, step_id: String, entry: Value) {
        if let Some(steps) = self.steps.as_object_mut() {
            steps.insert(step_id, entry);
        }
    }

    /// Look up one of the three roots by name
    pub fn root(&self, name: &str) -> Option<&Value> {
        match name {
            "input" => Some(&self.input),
            "steps" => Some(&self.steps),
            "context" => Some(&self.scope_value),
            _ => None,
        }
    }

    /// Snapshot of the whole context as a single JSON document
    pub fn to_value(&self) -> Value {
        json!({
            "input": self.input,
            "steps": self.steps,
            "context": self.scope_value,
        })
    }
}
