//! Run command - executes a workflow with the built-in step handlers

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{ExecutionStatus, StepRegistry};
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::llm::OpenAiCompletionService;
use crate::infrastructure::retrieval::{InMemoryRetrievalService, RetrievalDocument};
use crate::infrastructure::workflow::{
    register_builtin_handlers, BuiltinServices, TracingExecutionSink, WorkflowExecutorConfig,
    WorkflowExecutorImpl,
};

/// Arguments for the run command
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Workflow definition (JSON)
    pub file: PathBuf,

    /// Input payload as inline JSON, or `@path` to read it from a file
    #[arg(long, default_value = "{}")]
    pub input: String,

    /// Tenant the run executes for
    #[arg(long, default_value = "default")]
    pub tenant: String,

    /// JSON array of documents to seed the in-memory retrieval service
    #[arg(long)]
    pub documents: Option<PathBuf>,
}

/// Execute the workflow and print the execution record as JSON
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = super::bootstrap();

    let workflow = super::load_workflow(&args.file)?;
    let input = parse_input(&args.input)?;

    let registry = build_registry(&config, args.documents.as_deref())?;
    let executor = WorkflowExecutorImpl::with_config(
        Arc::new(registry),
        Arc::new(TracingExecutionSink::new()),
        WorkflowExecutorConfig::from(&config.executor),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    info!(workflow_id = %workflow.id(), tenant_id = %args.tenant, "Running workflow");

    let execution = executor
        .execute_with_cancellation(&workflow, &args.tenant, input, cancel)
        .await;

    println!("{}", serde_json::to_string_pretty(&execution)?);

    if execution.status() != ExecutionStatus::Completed {
        anyhow::bail!(
            "Execution {} finished with status {}",
            execution.id(),
            execution.status()
        );
    }

    Ok(())
}

fn parse_input(input: &str) -> anyhow::Result<Value> {
    let json = match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path))?,
        None => input.to_string(),
    };

    serde_json::from_str(&json).context("Input is not valid JSON")
}

fn load_documents(path: &Path) -> anyhow::Result<Vec<RetrievalDocument>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file {}", path.display()))?;

    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse documents file {}", path.display()))
}

fn build_registry(config: &AppConfig, documents: Option<&Path>) -> anyhow::Result<StepRegistry> {
    let documents = match documents {
        Some(path) => load_documents(path)?,
        None => Vec::new(),
    };
    info!(documents = documents.len(), "Seeding in-memory retrieval service");

    let timeout = Duration::from_millis(config.completion.request_timeout_ms);
    let completion = OpenAiCompletionService::with_base_url(
        HttpClient::with_timeout(timeout)?,
        config.completion.api_key.clone(),
        config.completion.base_url.clone(),
    );

    let services = BuiltinServices::new()
        .with_retrieval(Arc::new(InMemoryRetrievalService::with_documents(documents)))
        .with_completion(Arc::new(completion), config.completion.default_model.clone())
        .with_http_client(Arc::new(HttpClient::with_timeout(timeout)?));

    let mut registry = StepRegistry::new();
    register_builtin_handlers(&mut registry, services);
    Ok(registry)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if signal::ctrl_c().await.is_ok() {
        warn!("Received Ctrl+C, cancelling execution");
        cancel.cancel();
    }
}
