//! Emission points for run and step events

use std::fmt::Debug;

use serde_json::Value;

/// Narrow logging sink the executor reports through
pub trait ExecutionSink: Send + Sync + Debug {
    fn info(&self, message: &str, fields: &Value);
    fn warn(&self, message: &str, fields: &Value);
    fn error(&self, message: &str, fields: &Value);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutionSink;

impl ExecutionSink for NoopExecutionSink {
    fn info(&self, _message: &str, _fields: &Value) {}
    fn warn(&self, _message: &str, _fields: &Value) {}
    fn error(&self, _message: &str, _fields: &Value) {}
}
