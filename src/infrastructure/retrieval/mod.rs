//! Retrieval service implementations

mod in_memory;

pub use in_memory::{InMemoryRetrievalService, RetrievalDocument};
