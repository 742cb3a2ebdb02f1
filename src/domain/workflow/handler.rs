//! Step handler contract
//!
//! A handler backs one step type. The executor resolves templates in the step's
//! params, asks the handler to validate them, then executes it against a
//! read-only view of the context. All context updates flow through the returned
//! [`StepResult`].

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::context::TemplateContext;

/// Error reported by a handler
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message}")]
pub struct StepError {
    pub message: String,
    pub code: String,

    /// Whether another attempt may succeed
    pub recoverable: bool,
}

impl StepError {
    /// A recoverable error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            recoverable: true,
        }
    }

    /// An error that retrying cannot fix
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            ..Self::new(code, message)
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::fatal("INVALID_PARAMS", message)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Side-effect counters and timing reported by a handler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    /// Filled in by the executor
    pub duration_ms: u64,

    #[serde(default)]
    pub retrieval_calls: u32,

    #[serde(default)]
    pub llm_calls: u32,

    #[serde(default)]
    pub external_calls: u32,

    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,
}

impl StepMetadata {
    pub fn with_retrieval_calls(mut self, calls: u32) -> Self {
        self.retrieval_calls = calls;
        self
    }

    pub fn with_llm_calls(mut self, calls: u32) -> Self {
        self.llm_calls = calls;
        self
    }

    pub fn with_external_calls(mut self, calls: u32) -> Self {
        self.external_calls = calls;
        self
    }

    pub fn with_tokens(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self.total_tokens = prompt_tokens.saturating_add(completion_tokens);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Uniform envelope returned by every handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    pub output: Value,
    pub metadata: StepMetadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    /// Create a successful result
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            metadata: StepMetadata::default(),
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: StepError) -> Self {
        Self {
            success: false,
            output: Value::Null,
            metadata: StepMetadata::default(),
            error: Some(error),
        }
    }

    pub fn with_metadata(mut self, metadata: StepMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The error of a failed result, synthesized if the handler left it empty
    pub fn error_or_default(&self) -> StepError {
        self.error
            .clone()
            .unwrap_or_else(|| StepError::new("STEP_FAILED", "Step reported failure without an error"))
    }
}

/// JSON type of a parameter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    /// Templated params arrive as strings, so numeric types accept numeric text
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => {
                value.is_number() || value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok())
            }
            Self::Integer => {
                value.is_u64()
                    || value.is_i64()
                    || value.as_str().is_some_and(|s| s.trim().parse::<i64>().is_ok())
            }
            Self::Boolean => {
                value.is_boolean() || matches!(value.as_str(), Some("true" | "false"))
            }
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Descriptor of one parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParamField {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamField {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Machine-readable shape of a handler's params, for tooling
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParamSchema {
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: ParamField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check presence of required fields and the type of every present field
    pub fn check(&self, params: &Value) -> Result<(), StepError> {
        let map = params
            .as_object()
            .ok_or_else(|| StepError::invalid_params("params must be an object"))?;

        for field in &self.fields {
            match map.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(StepError::invalid_params(format!(
                        "missing required param '{}'",
                        field.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.param_type.matches(value) => {
                    return Err(StepError::invalid_params(format!(
                        "param '{}' must be of type {:?}",
                        field.name, field.param_type
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// The unit of work behind one step type
#[async_trait]
pub trait StepHandler: Send + Sync + Debug {
    /// Reject malformed params before any side effect
    fn validate_params(&self, params: &Value) -> Result<(), StepError>;

    /// Execute with resolved params; must not retain the context
    async fn execute(&self, params: &Value, context: &TemplateContext) -> StepResult;

    /// Shape of the accepted params
    fn param_schema(&self) -> ParamSchema;
}
