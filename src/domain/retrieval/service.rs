use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(test)]
use mockall::automock;

use crate::domain::error::DomainError;

/// Search against one collection on behalf of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub collection_id: String,
    pub query: String,
    pub top_k: usize,

    /// Metadata equality filters
    #[serde(default)]
    pub filters: HashMap<String, Value>,

    pub tenant_id: String,
}

impl SearchRequest {
    pub fn new(
        collection_id: impl Into<String>,
        query: impl Into<String>,
        top_k: usize,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            query: query.into(),
            top_k,
            filters: HashMap::new(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_filters(mut self, filters: HashMap<String, Value>) -> Self {
        self.filters = filters;
        self
    }
}

/// One retrieved passage, ordered by descending score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SearchHit {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Service searching document collections
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = SearchRequest::new("docs", "rust", 3, "acme").with_filter("lang", json!("en"));

        assert_eq!(request.top_k, 3);
        assert_eq!(request.filters.get("lang"), Some(&json!("en")));
    }

    #[tokio::test]
    async fn test_mock_service() {
        let mut service = MockRetrievalService::new();
        service
            .expect_search()
            .withf(|r| r.collection_id == "docs")
            .returning(|_| Ok(vec![SearchHit::new("hello", 0.9)]));

        let hits = service
            .search(SearchRequest::new("docs", "q", 1, "t"))
            .await
            .unwrap();
        assert_eq!(hits[0].text, "hello");
    }
}
