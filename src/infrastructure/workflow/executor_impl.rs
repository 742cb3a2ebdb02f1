//! Workflow executor implementation

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::metrics::{record_step_execution, record_step_retry, record_workflow_execution};
use crate::config::ExecutorConfig;
use crate::domain::{
    ExecutionScope, ExecutionSink, StepError, StepExecution, StepHandler, StepRegistry,
    StepResult, StepStatus, TemplateContext, TemplateEngine, Workflow, WorkflowError,
    WorkflowExecution, WorkflowExecutor, WorkflowStep, WorkflowValidator,
};

const STEP_TIMEOUT_CODE: &str = "STEP_TIMEOUT";

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct WorkflowExecutorConfig {
    /// Per-attempt timeout for steps that do not set `timeoutMs`
    pub default_step_timeout_ms: u64,
}

impl Default for WorkflowExecutorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: 60000, // 60 seconds
        }
    }
}

impl From<&ExecutorConfig> for WorkflowExecutorConfig {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            default_step_timeout_ms: config.default_step_timeout_ms,
        }
    }
}

/// How a single step ended
enum StepOutcome {
    Completed(StepResult),
    Failed(StepError),
    Cancelled,
}

/// Limits checked before every step
struct RunLimits {
    started: Instant,
    max_steps: usize,
    max_duration_ms: Option<u64>,
}

impl RunLimits {
    fn check(&self, executed: usize, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        if executed >= self.max_steps {
            return Err(WorkflowError::step_limit_exceeded(self.max_steps));
        }

        if let Some(limit_ms) = self.max_duration_ms {
            if self.started.elapsed() > Duration::from_millis(limit_ms) {
                return Err(WorkflowError::timeout(limit_ms));
            }
        }

        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        Ok(())
    }
}

/// Workflow executor implementation
///
/// Runs one step at a time, following `nextStepId`/`onSuccess`/`onFailure`
/// edges and conditional branch results. The registry is shared read-only, so
/// independent runs may execute concurrently on the same executor.
#[derive(Debug)]
pub struct WorkflowExecutorImpl {
    registry: Arc<StepRegistry>,
    sink: Arc<dyn ExecutionSink>,
    config: WorkflowExecutorConfig,
}

impl WorkflowExecutorImpl {
    /// Create a new executor
    pub fn new(registry: Arc<StepRegistry>, sink: Arc<dyn ExecutionSink>) -> Self {
        Self {
            registry,
            sink,
            config: WorkflowExecutorConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(
        registry: Arc<StepRegistry>,
        sink: Arc<dyn ExecutionSink>,
        config: WorkflowExecutorConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowExecutorConfig {
        &self.config
    }

    /// Execute a workflow, stopping at the next step boundary (or mid-step) once
    /// `cancel` fires
    pub async fn execute_with_cancellation(
        &self,
        workflow: &Workflow,
        tenant_id: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> WorkflowExecution {
        let started = Instant::now();
        let mut execution = WorkflowExecution::new(workflow, tenant_id, input);
        execution.start();

        self.sink.info(
            "Workflow execution started",
            &json!({
                "executionId": execution.id(),
                "workflowId": workflow.id().as_str(),
                "tenantId": tenant_id,
            }),
        );

        let validation = WorkflowValidator::validate(workflow);
        for warning in &validation.warnings {
            self.sink.warn(
                "Workflow validation warning",
                &json!({"executionId": execution.id(), "warning": warning}),
            );
        }

        let result = match validation.into_result() {
            Ok(()) => self.run(workflow, &mut execution, started, &cancel).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                execution.complete();
                self.sink.info(
                    "Workflow execution completed",
                    &json!({
                        "executionId": execution.id(),
                        "stepsExecuted": execution.metrics().steps_executed,
                        "durationMs": execution.metrics().total_duration_ms,
                    }),
                );
            }
            Err(e) => {
                execution.fail(&e);
                self.sink.error(
                    "Workflow execution failed",
                    &json!({
                        "executionId": execution.id(),
                        "status": execution.status().as_str(),
                        "code": e.code(),
                        "stepId": e.step_id(),
                        "error": e.to_string(),
                    }),
                );
            }
        }

        record_workflow_execution(execution.status(), started.elapsed());
        execution
    }

    async fn run(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let scope = ExecutionScope::new(
            workflow.id().as_str(),
            execution.id(),
            execution.tenant_id(),
        );
        let mut context = TemplateContext::new(execution.input().clone(), &scope);

        let limits = RunLimits {
            started,
            max_steps: workflow.max_steps(),
            max_duration_ms: workflow.max_execution_duration_ms(),
        };

        debug!(
            workflow_id = %workflow.id(),
            execution_id = %execution.id(),
            max_steps = limits.max_steps,
            "Executing workflow"
        );

        let steps = workflow.step_index();
        let mut executed = 0;
        let mut current = Some(workflow.entry_step_id().to_string());

        while let Some(step_id) = current.take() {
            limits.check(executed, cancel)?;

            let step = *steps
                .get(step_id.as_str())
                .ok_or_else(|| WorkflowError::step_not_found(&step_id))?;

            executed += 1;
            execution.push_step(StepExecution::start(step));
            execution.metrics_mut().steps_executed += 1;

            current = self.run_step(step, &mut context, execution, cancel).await?;
        }

        Ok(())
    }

    /// Run one step and return the id of the step to run next
    async fn run_step(
        &self,
        step: &WorkflowStep,
        context: &mut TemplateContext,
        execution: &mut WorkflowExecution,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, WorkflowError> {
        let step_started = Instant::now();
        let fields = json!({
            "executionId": execution.id(),
            "stepId": step.id(),
            "stepType": step.step_type(),
        });
        self.sink.info("Step started", &fields);

        let Some(handler) = self.registry.get(step.step_type()) else {
            let error = WorkflowError::handler_not_found(step.id(), step.step_type());
            self.fail_step(execution, step, &StepError::fatal(error.code(), error.to_string()));
            return Err(error);
        };

        let params = TemplateEngine::resolve_value(step.params(), context);
        if let Some(record) = execution.current_step_mut() {
            record.set_input(params.clone());
        }

        if let Err(e) = handler.validate_params(&params) {
            self.fail_step(execution, step, &e);
            return Err(WorkflowError::invalid_params(step.id(), e.message));
        }

        let outcome = self
            .attempt(step, handler.as_ref(), &params, context, execution, cancel)
            .await;

        match outcome {
            StepOutcome::Completed(result) => {
                let duration_ms = step_started.elapsed().as_millis() as u64;
                let metadata = result.metadata.with_duration_ms(duration_ms);

                execution.metrics_mut().record(&metadata);
                context.record_step(step.id(), result.output.clone(), metadata.to_value());

                let next = next_step(step, &result.output);
                if let Some(record) = execution.current_step_mut() {
                    record.complete(result.output, metadata);
                }

                record_step_execution(step.step_type(), StepStatus::Completed, step_started.elapsed());
                self.sink.info(
                    "Step completed",
                    &json!({
                        "executionId": execution.id(),
                        "stepId": step.id(),
                        "durationMs": duration_ms,
                        "nextStepId": next,
                    }),
                );

                Ok(next)
            }
            StepOutcome::Failed(error) => {
                self.fail_step(execution, step, &error);
                record_step_execution(step.step_type(), StepStatus::Failed, step_started.elapsed());

                if let Some(target) = step.on_failure() {
                    debug!(step_id = step.id(), on_failure = target, "Following failure edge");
                    context.record_failure(step.id(), error.to_value());
                    return Ok(Some(target.to_string()));
                }

                if error.code == STEP_TIMEOUT_CODE {
                    Err(WorkflowError::step_timeout(step.id(), self.step_timeout(step).as_millis() as u64))
                } else {
                    Err(WorkflowError::step_execution(step.id(), error.code, error.message))
                }
            }
            StepOutcome::Cancelled => {
                if let Some(record) = execution.current_step_mut() {
                    record.skip("Execution cancelled");
                }
                record_step_execution(step.step_type(), StepStatus::Skipped, step_started.elapsed());
                Err(WorkflowError::Cancelled)
            }
        }
    }

    /// Execute with the step's retry policy and per-attempt timeout
    async fn attempt(
        &self,
        step: &WorkflowStep,
        handler: &dyn StepHandler,
        params: &Value,
        context: &TemplateContext,
        execution: &mut WorkflowExecution,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let policy = step.retry().copied().unwrap_or_default();
        let max_attempts = policy.attempts();
        let timeout = self.step_timeout(step);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                result = tokio::time::timeout(timeout, handler.execute(params, context)) => result,
            };

            let result = result.unwrap_or_else(|_| {
                StepResult::failure(StepError::new(
                    STEP_TIMEOUT_CODE,
                    format!("Attempt {} timed out after {}ms", attempt, timeout.as_millis()),
                ))
            });

            if let Some(record) = execution.current_step_mut() {
                record.set_retry_count(attempt - 1);
            }

            if result.success {
                return StepOutcome::Completed(result);
            }

            let error = result.error_or_default();
            if attempt >= max_attempts || !error.recoverable {
                return StepOutcome::Failed(error);
            }

            let delay = policy.delay_for_attempt(attempt);
            execution.metrics_mut().retries += 1;
            record_step_retry(step.step_type());
            self.sink.warn(
                "Retrying step",
                &json!({
                    "executionId": execution.id(),
                    "stepId": step.id(),
                    "attempt": attempt,
                    "maxAttempts": max_attempts,
                    "delayMs": delay.as_millis() as u64,
                    "error": error.to_value(),
                }),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn fail_step(&self, execution: &mut WorkflowExecution, step: &WorkflowStep, error: &StepError) {
        if let Some(record) = execution.current_step_mut() {
            record.fail(error);
        }
        execution.metrics_mut().steps_failed += 1;

        self.sink.error(
            "Step failed",
            &json!({
                "executionId": execution.id(),
                "stepId": step.id(),
                "code": error.code,
                "error": error.message,
                "recoverable": error.recoverable,
            }),
        );
    }

    fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        Duration::from_millis(step.timeout_ms().unwrap_or(self.config.default_step_timeout_ms))
    }
}

/// Conditional steps route through their output; others follow `onSuccess`,
/// then `nextStepId`
fn next_step(step: &WorkflowStep, output: &Value) -> Option<String> {
    if step.is_conditional() {
        return output
            .get("nextStepId")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    step.on_success()
        .or(step.next_step_id())
        .map(str::to_string)
}

#[async_trait]
impl WorkflowExecutor for WorkflowExecutorImpl {
    async fn execute(&self, workflow: &Workflow, tenant_id: &str, input: Value) -> WorkflowExecution {
        self.execute_with_cancellation(workflow, tenant_id, input, CancellationToken::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::MockCompletionService;
    use crate::domain::workflow::{RecordingSink, RetryPolicy, ScriptedHandler};
    use crate::domain::{
        Completion, ExecutionStatus, NoopExecutionSink, StepRegistry, Usage, WorkflowId,
    };
    use crate::infrastructure::retrieval::{InMemoryRetrievalService, RetrievalDocument};
    use crate::infrastructure::workflow::handlers::{register_builtin_handlers, BuiltinServices};

    fn workflow(entry: &str, steps: Vec<WorkflowStep>) -> Workflow {
        Workflow::new(WorkflowId::new("test-workflow").unwrap(), entry).with_steps(steps)
    }

    fn executor(registry: StepRegistry) -> WorkflowExecutorImpl {
        WorkflowExecutorImpl::new(Arc::new(registry), Arc::new(NoopExecutionSink))
    }

    fn with_builtins(mut registry: StepRegistry) -> StepRegistry {
        register_builtin_handlers(&mut registry, BuiltinServices::new());
        registry
    }

    #[tokio::test]
    async fn test_linear_workflow_passes_outputs() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            Arc::new(ScriptedHandler::succeeding(Value::Null)),
        )));

        let workflow = workflow(
            "first",
            vec![
                WorkflowStep::new("first", "echo")
                    .with_params(json!({"greeting": "Hello {{input.name}}"}))
                    .with_next("second"),
                WorkflowStep::new("second", "echo")
                    .with_params(json!({"echoed": "{{steps.first.output.greeting}}!"})),
            ],
        );

        let execution = executor.execute(&workflow, "acme", json!({"name": "Ada"})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.steps().len(), 2);
        assert_eq!(execution.output(), Some(&json!({"echoed": "Hello Ada!"})));
        assert_eq!(execution.steps()[1].input(), &json!({"echoed": "Hello Ada!"}));
        assert_eq!(execution.metrics().steps_executed, 2);
        assert_eq!(execution.metrics().external_calls, 2);
        assert!(execution.error().is_none());
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let handler = Arc::new(ScriptedHandler::succeeding(json!({"ok": true})).failing_times(2));
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "flaky",
            handler.clone(),
        )));

        let workflow = workflow(
            "flaky",
            vec![WorkflowStep::new("flaky", "flaky").with_retry(RetryPolicy::new(3))],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.steps().len(), 1);
        assert_eq!(execution.steps()[0].status(), StepStatus::Completed);
        assert_eq!(execution.steps()[0].retry_count(), 2);
        assert_eq!(execution.metrics().retries, 2);
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let handler = Arc::new(ScriptedHandler::always_failing());
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "broken",
            handler.clone(),
        )));

        let workflow = workflow(
            "broken",
            vec![WorkflowStep::new("broken", "broken").with_retry(RetryPolicy::new(2))],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(handler.calls(), 2);
        let error = execution.error().unwrap();
        assert_eq!(error.code, "STEP_FAILED");
        assert_eq!(error.step_id.as_deref(), Some("broken"));
        assert_eq!(execution.steps()[0].error_code(), Some("SCRIPTED"));
        assert_eq!(execution.metrics().steps_failed, 1);
    }

    #[tokio::test]
    async fn test_non_recoverable_error_stops_retrying() {
        let handler = Arc::new(ScriptedHandler::always_failing().non_recoverable());
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "fatal",
            handler.clone(),
        )));

        let workflow = workflow(
            "fatal",
            vec![WorkflowStep::new("fatal", "fatal").with_retry(RetryPolicy::new(5))],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_conditional_branching() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            Arc::new(ScriptedHandler::succeeding(Value::Null)),
        )));

        let workflow = workflow(
            "check",
            vec![
                WorkflowStep::new("check", "conditional").with_params(json!({
                    "condition": "input.score > 0.8",
                    "onTrue": "high",
                    "onFalse": "low"
                })),
                WorkflowStep::new("high", "echo").with_params(json!({"branch": "high"})),
                WorkflowStep::new("low", "echo").with_params(json!({"branch": "low"})),
            ],
        );

        let execution = executor.execute(&workflow, "acme", json!({"score": 0.9})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        let ids: Vec<&str> = execution.steps().iter().map(StepExecution::step_id).collect();
        assert_eq!(ids, vec!["check", "high"]);
        assert_eq!(execution.output(), Some(&json!({"branch": "high"})));
    }

    #[tokio::test]
    async fn test_conditional_without_matching_branch_ends_run() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            Arc::new(ScriptedHandler::succeeding(Value::Null)),
        )));

        let workflow = workflow(
            "check",
            vec![
                WorkflowStep::new("check", "conditional")
                    .with_params(json!({"condition": "input.go", "onTrue": "work"})),
                WorkflowStep::new("work", "echo"),
            ],
        );

        let execution = executor.execute(&workflow, "acme", json!({"go": false})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.steps().len(), 1);
        assert_eq!(
            execution.output(),
            Some(&json!({"result": false, "nextStepId": null}))
        );
    }

    #[tokio::test]
    async fn test_failure_edge_exposes_error() {
        let executor = executor(with_builtins(
            StepRegistry::new()
                .with_handler("broken", Arc::new(ScriptedHandler::always_failing().non_recoverable()))
                .with_handler("echo", Arc::new(ScriptedHandler::succeeding(Value::Null))),
        ));

        let workflow = workflow(
            "primary",
            vec![
                WorkflowStep::new("primary", "broken")
                    .with_next("done")
                    .with_on_failure("fallback"),
                WorkflowStep::new("fallback", "echo")
                    .with_params(json!({"reason": "{{steps.primary.error.code}}"})),
                WorkflowStep::new("done", "echo"),
            ],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.steps()[0].status(), StepStatus::Failed);
        assert_eq!(execution.steps()[1].step_id(), "fallback");
        assert_eq!(execution.output(), Some(&json!({"reason": "SCRIPTED"})));
        assert_eq!(execution.steps().len(), 2);
    }

    fn chain(count: usize) -> Vec<WorkflowStep> {
        (0..count)
            .map(|i| {
                let step = WorkflowStep::new(format!("s{}", i), "echo");
                if i + 1 < count {
                    step.with_next(format!("s{}", i + 1))
                } else {
                    step
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_workflow_max_steps_governs_long_runs() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            Arc::new(ScriptedHandler::succeeding(json!(1))),
        )));

        let workflow = workflow("s0", chain(120)).with_max_steps(200);

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Completed, "{:?}", execution.error());
        assert_eq!(execution.steps().len(), 120);
        assert_eq!(execution.metrics().steps_executed, 120);
    }

    #[test]
    fn test_run_limits_step_count() {
        let limits = RunLimits {
            started: Instant::now(),
            max_steps: 2,
            max_duration_ms: None,
        };
        let cancel = CancellationToken::new();

        assert!(limits.check(1, &cancel).is_ok());
        let error = limits.check(2, &cancel).unwrap_err();
        assert_eq!(error.code(), "STEP_LIMIT_EXCEEDED");
        assert!(error.is_timeout());

        // The step limit is reported ahead of cancellation
        cancel.cancel();
        assert_eq!(limits.check(2, &cancel).unwrap_err().code(), "STEP_LIMIT_EXCEEDED");
        assert!(matches!(limits.check(0, &cancel), Err(WorkflowError::Cancelled)));
    }

    #[tokio::test]
    async fn test_step_timeout_is_retried() {
        let handler = Arc::new(
            ScriptedHandler::succeeding(json!("late")).with_delay(Duration::from_millis(200)),
        );
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "slow",
            handler.clone(),
        )));

        let workflow = workflow(
            "slow",
            vec![WorkflowStep::new("slow", "slow")
                .with_timeout_ms(20)
                .with_retry(RetryPolicy::new(2))],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.error().unwrap().code, "STEP_TIMEOUT");
        assert_eq!(execution.steps()[0].retry_count(), 1);
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn test_overall_duration_limit() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "slow",
            Arc::new(ScriptedHandler::succeeding(json!(1)).with_delay(Duration::from_millis(30))),
        )));

        let workflow = workflow(
            "a",
            vec![
                WorkflowStep::new("a", "slow").with_next("b"),
                WorkflowStep::new("b", "slow"),
            ],
        )
        .with_max_execution_duration_ms(10);

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Timeout);
        assert_eq!(execution.error().unwrap().code, "TIMEOUT");
        assert_eq!(execution.steps().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_workflow_runs_nothing() {
        let handler = Arc::new(ScriptedHandler::succeeding(json!(1)));
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            handler.clone(),
        )));

        let workflow = workflow(
            "a",
            vec![
                WorkflowStep::new("a", "echo").with_next("b"),
                WorkflowStep::new("b", "echo").with_next("a"),
            ],
        );

        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.error().unwrap().code, "VALIDATION_ERROR");
        assert!(execution.error().unwrap().message.contains("Cycle detected"));
        assert!(execution.steps().is_empty());
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let executor = executor(StepRegistry::new());

        let workflow = workflow("a", vec![WorkflowStep::new("a", "unknown")]);
        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.error().unwrap().code, "HANDLER_NOT_FOUND");
        assert_eq!(execution.steps()[0].status(), StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let executor = executor(with_builtins(StepRegistry::new()));

        let workflow = workflow(
            "call",
            vec![WorkflowStep::new("call", "http_request").with_params(json!({"url": "not a url"}))],
        );
        let execution = executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.error().unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "echo",
            Arc::new(ScriptedHandler::succeeding(json!(1))),
        )));
        let workflow = workflow("a", vec![WorkflowStep::new("a", "echo")]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let execution = executor
            .execute_with_cancellation(&workflow, "acme", json!({}), cancel)
            .await;

        assert_eq!(execution.status(), ExecutionStatus::Cancelled);
        assert_eq!(execution.error().unwrap().code, "CANCELLED");
        assert!(execution.steps().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_mid_step() {
        let executor = executor(with_builtins(StepRegistry::new().with_handler(
            "slow",
            Arc::new(ScriptedHandler::succeeding(json!(1)).with_delay(Duration::from_secs(5))),
        )));
        let workflow = workflow("a", vec![WorkflowStep::new("a", "slow")]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let execution = executor
            .execute_with_cancellation(&workflow, "acme", json!({}), cancel)
            .await;

        assert_eq!(execution.status(), ExecutionStatus::Cancelled);
        assert_eq!(execution.steps()[0].status(), StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_sink_receives_events() {
        let sink = Arc::new(RecordingSink::new());
        let executor = WorkflowExecutorImpl::new(
            Arc::new(with_builtins(StepRegistry::new().with_handler(
                "flaky",
                Arc::new(ScriptedHandler::succeeding(json!(1)).failing_times(1)),
            ))),
            sink.clone(),
        );

        let workflow = workflow(
            "a",
            vec![WorkflowStep::new("a", "flaky").with_retry(RetryPolicy::new(2))],
        );
        executor.execute(&workflow, "acme", json!({})).await;

        assert_eq!(
            sink.messages("info"),
            vec![
                "Workflow execution started",
                "Step started",
                "Step completed",
                "Workflow execution completed"
            ]
        );
        assert_eq!(sink.messages("warn"), vec!["Retrying step"]);
        assert!(sink.messages("error").is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_then_completion() {
        let retrieval = Arc::new(InMemoryRetrievalService::with_documents(vec![
            RetrievalDocument::new("docs", "Rust guarantees memory safety without a garbage collector"),
            RetrievalDocument::new("docs", "Cooking pasta takes ten minutes"),
            RetrievalDocument::new("docs", "Rust memory secrets").with_tenant("other-tenant"),
        ]));

        let mut completion = MockCompletionService::new();
        completion
            .expect_complete()
            .withf(|r| {
                r.prompt
                    == "Context: Rust guarantees memory safety without a garbage collector\nQ: How does Rust handle memory?"
            })
            .times(1)
            .returning(|r| {
                Ok(Completion::new("Through ownership.", r.model).with_usage(Usage::new(20, 4)))
            });

        let mut registry = StepRegistry::new();
        register_builtin_handlers(
            &mut registry,
            BuiltinServices::new()
                .with_retrieval(retrieval)
                .with_completion(Arc::new(completion), "test-model"),
        );
        let executor = executor(registry);

        let workflow = workflow(
            "retrieve",
            vec![
                WorkflowStep::new("retrieve", "retrieval")
                    .with_params(json!({
                        "collectionId": "docs",
                        "query": "{{input.question}}",
                        "topK": 1
                    }))
                    .with_next("answer"),
                WorkflowStep::new("answer", "completion").with_params(json!({
                    "prompt": "Context: {{steps.retrieve.output.results[0].text}}\nQ: {{input.question}}"
                })),
            ],
        );

        let execution = executor
            .execute(&workflow, "acme", json!({"question": "How does Rust handle memory?"}))
            .await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(
            execution.output(),
            execution.steps()[1].output(),
        );
        assert_eq!(execution.output().unwrap()["text"], json!("Through ownership."));

        let metrics = execution.metrics();
        assert_eq!(metrics.retrieval_calls, 1);
        assert_eq!(metrics.llm_calls, 1);
        assert_eq!(metrics.total_tokens, 24);
    }
}
