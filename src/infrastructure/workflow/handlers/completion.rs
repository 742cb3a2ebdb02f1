//! Completion step: sends a prompt to the completion service

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::params::{optional_f64, optional_str, optional_u64, required_str, service_error};
use crate::domain::workflow::{ParamField, ParamType};
use crate::domain::{
    CompletionRequest, CompletionService, ParamSchema, StepError, StepHandler, StepMetadata,
    StepResult, TemplateContext,
};

/// Handler for `completion` steps
#[derive(Clone)]
pub struct CompletionHandler {
    service: Arc<dyn CompletionService>,
    default_model: String,
}

impl std::fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl CompletionHandler {
    pub fn new(service: Arc<dyn CompletionService>, default_model: impl Into<String>) -> Self {
        Self {
            service,
            default_model: default_model.into(),
        }
    }

    fn build_request(&self, params: &Value) -> Result<CompletionRequest, StepError> {
        let model = optional_str(params, "model")?
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.default_model.as_str());

        let mut builder = CompletionRequest::builder(model, required_str(params, "prompt")?);

        if let Some(system) = optional_str(params, "systemPrompt")? {
            builder = builder.system_prompt(system);
        }

        if let Some(temp) = optional_f64(params, "temperature")? {
            if !(0.0..=2.0).contains(&temp) {
                return Err(StepError::invalid_params(
                    "param 'temperature' must be between 0 and 2",
                ));
            }
            builder = builder.temperature(temp as f32);
        }

        if let Some(max_tokens) = optional_u64(params, "maxTokens")? {
            let max_tokens = u32::try_from(max_tokens)
                .map_err(|_| StepError::invalid_params("param 'maxTokens' is too large"))?;
            builder = builder.max_tokens(max_tokens);
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl StepHandler for CompletionHandler {
    fn validate_params(&self, params: &Value) -> Result<(), StepError> {
        self.param_schema().check(params)?;
        self.build_request(params).map(|_| ())
    }

    async fn execute(&self, params: &Value, _context: &TemplateContext) -> StepResult {
        let request = match self.build_request(params) {
            Ok(request) => request,
            Err(e) => return StepResult::failure(e),
        };

        match self.service.complete(request).await {
            Ok(completion) => {
                let metadata = StepMetadata::default().with_llm_calls(1).with_tokens(
                    completion.usage.prompt_tokens,
                    completion.usage.completion_tokens,
                );

                StepResult::success(json!({
                    "text": completion.text,
                    "model": completion.model,
                    "usage": completion.usage,
                }))
                .with_metadata(metadata)
            }
            Err(e) => StepResult::failure(service_error("COMPLETION_FAILED", e))
                .with_metadata(StepMetadata::default().with_llm_calls(1)),
        }
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                ParamField::optional("model", ParamType::String)
                    .with_description("Model id; the configured default when omitted")
                    .with_default(json!(self.default_model)),
            )
            .field(ParamField::required("prompt", ParamType::String).with_description("User prompt"))
            .field(ParamField::optional("systemPrompt", ParamType::String))
            .field(ParamField::optional("temperature", ParamType::Number))
            .field(ParamField::optional("maxTokens", ParamType::Integer))
    }
}
