use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::{Completion, CompletionRequest};
use crate::domain::error::DomainError;

/// Service producing text completions (OpenAI-compatible APIs, local models, ...)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate a completion for the request
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, DomainError>;
}
