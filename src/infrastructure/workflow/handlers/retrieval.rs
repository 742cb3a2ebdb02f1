//! Retrieval step: searches a collection for the tenant running the workflow

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::params::{optional_f64, optional_object, optional_u64, required_str, service_error};
use crate::domain::workflow::{ParamField, ParamType};
use crate::domain::{
    ParamSchema, RetrievalService, SearchRequest, StepError, StepHandler, StepMetadata,
    StepResult, TemplateContext,
};

const DEFAULT_TOP_K: u64 = 5;

#[derive(Debug)]
struct RetrievalParams {
    collection_id: String,
    query: String,
    top_k: usize,
    filters: HashMap<String, Value>,
    min_score: Option<f32>,
}

impl RetrievalParams {
    fn parse(params: &Value) -> Result<Self, StepError> {
        let top_k = optional_u64(params, "topK")?.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(StepError::invalid_params("param 'topK' must be at least 1"));
        }

        let filters = optional_object(params, "filters")?
            .map(|f| f.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Self {
            collection_id: required_str(params, "collectionId")?.to_string(),
            query: required_str(params, "query")?.to_string(),
            top_k: usize::try_from(top_k).unwrap_or(usize::MAX),
            filters,
            min_score: optional_f64(params, "minScore")?.map(|s| s as f32),
        })
    }
}

/// Handler for `retrieval` steps
#[derive(Clone)]
pub struct RetrievalHandler {
    service: Arc<dyn RetrievalService>,
}

impl std::fmt::Debug for RetrievalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalHandler").finish_non_exhaustive()
    }
}

impl RetrievalHandler {
    pub fn new(service: Arc<dyn RetrievalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StepHandler for RetrievalHandler {
    fn validate_params(&self, params: &Value) -> Result<(), StepError> {
        self.param_schema().check(params)?;
        RetrievalParams::parse(params).map(|_| ())
    }

    async fn execute(&self, params: &Value, context: &TemplateContext) -> StepResult {
        let metadata = StepMetadata::default().with_retrieval_calls(1);

        let params = match RetrievalParams::parse(params) {
            Ok(params) => params,
            Err(e) => return StepResult::failure(e),
        };

        let request = SearchRequest::new(
            &params.collection_id,
            &params.query,
            params.top_k,
            &context.scope().tenant_id,
        )
        .with_filters(params.filters);

        debug!(
            collection_id = %params.collection_id,
            top_k = params.top_k,
            "Searching collection"
        );

        let hits = match self.service.search(request).await {
            Ok(hits) => hits,
            Err(e) => {
                return StepResult::failure(service_error("RETRIEVAL_FAILED", e))
                    .with_metadata(metadata);
            }
        };

        let results: Vec<Value> = hits
            .into_iter()
            .filter(|hit| params.min_score.is_none_or(|min| hit.score >= min))
            .map(|hit| {
                json!({
                    "text": hit.text,
                    "score": hit.score,
                    "metadata": hit.metadata,
                })
            })
            .collect();

        StepResult::success(json!({
            "count": results.len(),
            "results": results,
            "query": params.query,
        }))
        .with_metadata(metadata)
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .field(
                ParamField::required("collectionId", ParamType::String)
                    .with_description("Collection to search"),
            )
            .field(ParamField::required("query", ParamType::String).with_description("Search text"))
            .field(
                ParamField::optional("topK", ParamType::Integer)
                    .with_description("Maximum number of results")
                    .with_default(json!(DEFAULT_TOP_K)),
            )
            .field(
                ParamField::optional("filters", ParamType::Object)
                    .with_description("Metadata equality filters"),
            )
            .field(
                ParamField::optional("minScore", ParamType::Number)
                    .with_description("Drop results scoring below this value"),
            )
    }
}
