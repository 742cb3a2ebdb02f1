//! Document retrieval service boundary

mod service;

pub use service::{RetrievalService, SearchHit, SearchRequest};

#[cfg(test)]
pub use service::MockRetrievalService;
