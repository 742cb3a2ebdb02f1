//! Domain layer - Core workflow engine and service boundaries

pub mod error;
pub mod llm;
pub mod retrieval;
pub mod workflow;

pub use error::DomainError;
pub use llm::{Completion, CompletionRequest, CompletionService, Usage};
pub use retrieval::{RetrievalService, SearchHit, SearchRequest};
pub use workflow::{
    BuiltinStepType, ExecutionScope, ExecutionSink, ExecutionStatus, ExpressionEngine,
    NoopExecutionSink, ParamSchema, StepError, StepExecution, StepHandler, StepMetadata,
    StepRegistry, StepResult, StepStatus, TemplateContext, TemplateEngine, ValidationResult,
    Workflow, WorkflowError, WorkflowExecution, WorkflowExecutor, WorkflowId, WorkflowStep,
    WorkflowValidator,
};
