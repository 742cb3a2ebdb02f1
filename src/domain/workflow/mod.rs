//! Workflow domain module
//!
//! Workflows are graphs of typed steps executed one at a time. Steps read a
//! shared [`TemplateContext`] through two small sub-languages:
//!
//! ## Templates
//!
//! `{{path}}` placeholders in step params are resolved before a step runs:
//! - `{{input.question}}` - caller-supplied input
//! - `{{steps.search.output.results[0].text}}` - output of a finished step
//! - `{{context.tenantId}}` - execution constants (`workflowId`, `executionId`, `tenantId`)
//!
//! ## Expressions
//!
//! Conditional steps branch on boolean expressions such as
//! `steps.search.output.count > 0 && input.mode != 'strict'`.

mod context;
mod entity;
mod error;
mod execution;
mod executor;
mod expression;
mod handler;
mod path;
mod registry;
mod sink;
mod step_types;
mod template;
mod validator;

pub use context::{ExecutionScope, TemplateContext};
pub use entity::{
    validate_workflow_id, RetryPolicy, Workflow, WorkflowId, WorkflowStep, CONDITION_PARAM,
    DEFAULT_MAX_STEPS, MAX_ID_LENGTH, ON_FALSE_PARAM, ON_TRUE_PARAM,
};
pub use error::WorkflowError;
pub use execution::{
    ExecutionError, ExecutionMetrics, ExecutionStatus, StepExecution, StepStatus,
    WorkflowExecution,
};
pub use executor::WorkflowExecutor;
pub use expression::{is_truthy, CompareOp, Expr, ExpressionEngine, ExpressionError, LogicalOp};
pub use handler::{
    ParamField, ParamSchema, ParamType, StepError, StepHandler, StepMetadata, StepResult,
};
pub use path::{PathError, PathSegment, ValuePath};
pub use registry::StepRegistry;
pub use sink::{ExecutionSink, NoopExecutionSink};
pub use step_types::{BuiltinStepType, CONDITIONAL_STEP_TYPE};
pub use template::{format_value, TemplateEngine, TemplateError};
pub use validator::{ValidationResult, WorkflowValidator};

#[cfg(test)]
pub use handler::mock::ScriptedHandler;
#[cfg(test)]
pub use sink::mock::RecordingSink;
