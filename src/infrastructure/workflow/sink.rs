//! Execution sink backed by `tracing`

use metrics::counter;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::ExecutionSink;

/// Forwards executor events to `tracing`, with the structured fields as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExecutionSink;

impl TracingExecutionSink {
    pub fn new() -> Self {
        Self
    }
}

fn count(level: &'static str) {
    counter!("workflow_sink_events_total", "level" => level).increment(1);
}

impl ExecutionSink for TracingExecutionSink {
    fn info(&self, message: &str, fields: &Value) {
        count("info");
        info!(target: "workflow", fields = %fields, "{}", message);
    }

    fn warn(&self, message: &str, fields: &Value) {
        count("warn");
        warn!(target: "workflow", fields = %fields, "{}", message);
    }

    fn error(&self, message: &str, fields: &Value) {
        count("error");
        error!(target: "workflow", fields = %fields, "{}", message);
    }
}
