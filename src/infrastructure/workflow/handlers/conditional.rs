//! Conditional step: evaluates an expression and picks the next step

use async_trait::async_trait;
use serde_json::{json, Value};

use super::params::{optional_str, required_str};
use crate::domain::workflow::{ParamField, ParamType, CONDITION_PARAM, ON_FALSE_PARAM, ON_TRUE_PARAM};
use crate::domain::{
    ExpressionEngine, ParamSchema, StepError, StepHandler, StepResult, TemplateContext,
};

/// Handler for `conditional` steps
///
/// The output's `nextStepId` is what the executor follows; `null` ends the run.
#[derive(Debug, Clone, Default)]
pub struct ConditionalHandler;

impl ConditionalHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepHandler for ConditionalHandler {
    fn validate_params(&self, params: &Value) -> Result<(), StepError> {
        self.param_schema().check(params)?;
        required_str(params, CONDITION_PARAM)?;
        optional_str(params, ON_TRUE_PARAM)?;
        optional_str(params, ON_FALSE_PARAM)?;
        Ok(())
    }

    async fn execute(&self, params: &Value, context: &TemplateContext) -> StepResult {
        let condition = match required_str(params, CONDITION_PARAM) {
            Ok(condition) => condition,
            Err(e) => return StepResult::failure(e),
        };

        let result = ExpressionEngine::evaluate(condition, context);
        let branch = if result { ON_TRUE_PARAM } else { ON_FALSE_PARAM };

        let next_step_id = match optional_str(params, branch) {
            Ok(next) => next.map_or(Value::Null, |id| json!(id)),
            Err(e) => return StepResult::failure(e),
        };

        StepResult::success(json!({
            "result": result,
            "nextStepId": next_step_id,
        }))
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                ParamField::required(CONDITION_PARAM, ParamType::String)
                    .with_description("Boolean expression over input, steps and context"),
            )
            .field(
                ParamField::optional(ON_TRUE_PARAM, ParamType::String)
                    .with_description("Step to run when the condition holds"),
            )
            .field(
                ParamField::optional(ON_FALSE_PARAM, ParamType::String)
                    .with_description("Step to run otherwise"),
            )
    }
}
