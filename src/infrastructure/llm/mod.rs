//! Completion service implementations

mod openai;

pub use openai::OpenAiCompletionService;
