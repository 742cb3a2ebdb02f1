//! Workflow infrastructure implementations

mod executor_impl;
pub mod handlers;
mod metrics;
mod sink;

pub use executor_impl::{WorkflowExecutorConfig, WorkflowExecutorImpl};
pub use handlers::{register_builtin_handlers, BuiltinServices};
pub use sink::TracingExecutionSink;
