//! Built-in step handlers

mod completion;
mod conditional;
mod http_request;
mod params;
mod retrieval;

use std::sync::Arc;

use tracing::debug;

pub use completion::CompletionHandler;
pub use conditional::ConditionalHandler;
pub use http_request::HttpRequestHandler;
pub use retrieval::RetrievalHandler;

use crate::domain::{BuiltinStepType, CompletionService, RetrievalService, StepRegistry};
use crate::infrastructure::http_client::{HttpClient, HttpClientTrait};

/// Collaborators backing the built-in handlers
///
/// `retrieval` and `completion` are only registered when their service is
/// present; `conditional` and `http_request` are always available.
#[derive(Default)]
pub struct BuiltinServices {
    retrieval: Option<Arc<dyn RetrievalService>>,
    completion: Option<(Arc<dyn CompletionService>, String)>,
    http_client: Option<Arc<dyn HttpClientTrait>>,
}

impl BuiltinServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retrieval(mut self, service: Arc<dyn RetrievalService>) -> Self {
        self.retrieval = Some(service);
        self
    }

    pub fn with_completion(
        mut self,
        service: Arc<dyn CompletionService>,
        default_model: impl Into<String>,
    ) -> Self {
        self.completion = Some((service, default_model.into()));
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClientTrait>) -> Self {
        self.http_client = Some(client);
        self
    }
}

/// Register the built-in handlers under their `BuiltinStepType` names
pub fn register_builtin_handlers(registry: &mut StepRegistry, services: BuiltinServices) {
    if let Some(service) = services.retrieval {
        registry.register(
            BuiltinStepType::Retrieval.as_str(),
            Arc::new(RetrievalHandler::new(service)),
        );
    }

    if let Some((service, default_model)) = services.completion {
        registry.register(
            BuiltinStepType::Completion.as_str(),
            Arc::new(CompletionHandler::new(service, default_model)),
        );
    }

    registry.register(
        BuiltinStepType::Conditional.as_str(),
        Arc::new(ConditionalHandler::new()),
    );

    let client = services
        .http_client
        .unwrap_or_else(|| Arc::new(HttpClient::new()));
    registry.register(
        BuiltinStepType::HttpRequest.as_str(),
        Arc::new(HttpRequestHandler::new(client)),
    );

    debug!(types = ?registry.types(), "Registered built-in step handlers");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::MockCompletionService;
    use crate::domain::retrieval::MockRetrievalService;

    #[test]
    fn test_minimal_registration() {
        let mut registry = StepRegistry::new();
        register_builtin_handlers(&mut registry, BuiltinServices::new());

        assert_eq!(registry.types(), vec!["conditional", "http_request"]);
    }

    #[test]
    fn test_full_registration() {
        let mut registry = StepRegistry::new();
        register_builtin_handlers(
            &mut registry,
            BuiltinServices::new()
                .with_retrieval(Arc::new(MockRetrievalService::new()))
                .with_completion(Arc::new(MockCompletionService::new()), "gpt-4o-mini"),
        );

        for step_type in BuiltinStepType::ALL {
            assert!(registry.has(step_type.as_str()), "missing {}", step_type);
        }

        let schema = registry.get("completion").unwrap().param_schema();
        assert!(schema.get("prompt").is_some());
    }
}
