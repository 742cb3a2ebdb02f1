//! In-memory retrieval service for development and testing

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::domain::{DomainError, RetrievalService, SearchHit, SearchRequest};

/// A document stored in a collection
///
/// Documents without a tenant are visible to every tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalDocument {
    pub collection_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    pub text: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RetrievalDocument {
    pub fn new(collection_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            tenant_id: None,
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    fn visible_to(&self, collection_id: &str, tenant_id: &str) -> bool {
        self.collection_id == collection_id
            && self.tenant_id.as_deref().is_none_or(|t| t == tenant_id)
    }
}

/// Term-overlap retrieval over documents held in memory
#[derive(Debug, Default)]
pub struct InMemoryRetrievalService {
    documents: Arc<RwLock<Vec<RetrievalDocument>>>,
}

impl InMemoryRetrievalService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service pre-populated with documents
    pub fn with_documents(documents: Vec<RetrievalDocument>) -> Self {
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    pub async fn add_document(&self, document: RetrievalDocument) {
        self.documents.write().await.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the document
fn score(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms = terms(text);
    let matched = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

fn matches_filters(document: &RetrievalDocument, request: &SearchRequest) -> bool {
    request
        .filters
        .iter()
        .all(|(key, expected)| document.metadata.get(key) == Some(expected))
}

#[async_trait]
impl RetrievalService for InMemoryRetrievalService {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, DomainError> {
        let documents = self.documents.read().await;

        let visible: Vec<&RetrievalDocument> = documents
            .iter()
            .filter(|d| d.visible_to(&request.collection_id, &request.tenant_id))
            .collect();

        if visible.is_empty() {
            return Err(DomainError::not_found(format!(
                "Collection '{}' not found for tenant '{}'",
                request.collection_id, request.tenant_id
            )));
        }

        let query_terms = terms(&request.query);
        let mut hits: Vec<SearchHit> = visible
            .into_iter()
            .filter(|d| matches_filters(d, &request))
            .map(|d| (d, score(&query_terms, &d.text)))
            .filter(|(_, score)| *score > 0.0)
            .map(|(d, score)| SearchHit::new(d.text.clone(), score).with_metadata(d.metadata.clone()))
            .collect();

        // Stable sort keeps insertion order among equal scores
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.top_k);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> InMemoryRetrievalService {
        InMemoryRetrievalService::with_documents(vec![
            RetrievalDocument::new("docs", "Rust is a systems programming language")
                .with_metadata("lang", json!("en")),
            RetrievalDocument::new("docs", "Tokio is an async runtime for Rust")
                .with_metadata("lang", json!("en")),
            RetrievalDocument::new("docs", "Rust es un lenguaje de sistemas")
                .with_metadata("lang", json!("es")),
            RetrievalDocument::new("docs", "Acme internal Rust runbook").with_tenant("acme"),
            RetrievalDocument::new("other", "Unrelated collection about Rust"),
        ])
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_overlap() {
        let hits = service()
            .search(SearchRequest::new("docs", "Rust programming language", 10, "globex"))
            .await
            .unwrap();

        assert_eq!(hits[0].text, "Rust is a systems programming language");
        assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| !h.text.contains("Unrelated")));
    }

    #[tokio::test]
    async fn test_top_k_and_filters() {
        let service = service();

        let hits = service
            .search(SearchRequest::new("docs", "rust", 1, "globex"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = service
            .search(SearchRequest::new("docs", "rust", 10, "globex").with_filter("lang", json!("es")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.get("lang"), Some(&json!("es")));
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let service = service();

        let acme = service
            .search(SearchRequest::new("docs", "runbook", 10, "acme"))
            .await
            .unwrap();
        assert_eq!(acme.len(), 1);

        let globex = service
            .search(SearchRequest::new("docs", "runbook", 10, "globex"))
            .await
            .unwrap();
        assert!(globex.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let result = service()
            .search(SearchRequest::new("missing", "rust", 10, "acme"))
            .await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_add_document() {
        let service = InMemoryRetrievalService::new();
        assert!(service.is_empty().await);

        service
            .add_document(RetrievalDocument::new("kb", "hello world"))
            .await;
        assert_eq!(service.len().await, 1);

        let hits = service
            .search(SearchRequest::new("kb", "HELLO", 5, "t"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_document_deserialization() {
        let doc: RetrievalDocument = serde_json::from_value(json!({
            "collectionId": "docs",
            "text": "hello",
            "metadata": {"source": "a.md"}
        }))
        .unwrap();

        assert_eq!(doc.collection_id, "docs");
        assert!(doc.tenant_id.is_none());
        assert_eq!(doc.metadata.get("source"), Some(&json!("a.md")));
    }
}
