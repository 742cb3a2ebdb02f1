//! Workflow executor trait

use async_trait::async_trait;
use serde_json::Value;

use super::entity::Workflow;
use super::execution::WorkflowExecution;

/// Trait for workflow execution
///
/// Ordinary workflow failures never surface as errors: the returned record's
/// status and terminal error describe the outcome.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync + std::fmt::Debug {
    /// Execute a workflow for a tenant with the given input
    async fn execute(&self, workflow: &Workflow, tenant_id: &str, input: Value)
        -> WorkflowExecution;
}
