//! Text completion service boundary

mod request;
mod response;
mod service;

pub use request::{CompletionRequest, CompletionRequestBuilder};
pub use response::{Completion, Usage};
pub use service::CompletionService;

#[cfg(test)]
pub use service::MockCompletionService;
