//! PMP Workflow Engine
//!
//! Sequential execution of multi-step pipelines with support for:
//! - Retrieval, completion, conditional and external call steps
//! - Safe `{{path}}` templating and boolean expressions (no code execution)
//! - Static validation of the step graph (cycles, reachability, dangling edges)
//! - Per-step retry with linear backoff and timeouts

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
