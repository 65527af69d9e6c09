//! In-memory index, useful for testing and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domgate_core::error::RetrievalError;
use domgate_core::retrieval::{IndexDocument, Passage, RetrievalIndex};
use tokio::sync::RwLock;

use crate::text;

/// Keeps every collection in a map of document lists.
/// Relevance is the share of query terms a document contains.
pub struct InMemoryIndex {
    collections: Arc<RwLock<HashMap<String, Vec<IndexDocument>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live collections.
    pub async fn collection_count(&self) -> usize {
        self.collections.read().await.len()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn add(&self, collection: &str, documents: Vec<IndexDocument>) -> Result<usize, RetrievalError> {
        let count = documents.len();
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            match docs.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc,
                None => docs.push(doc),
            }
        }
        Ok(count)
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query_terms = text::terms(text);
        if query_terms.is_empty() {
            return Ok(vec![]);
        }

        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(vec![]);
        };

        let mut results: Vec<Passage> = docs
            .iter()
            .filter_map(|doc| {
                let doc_terms = text::terms(&doc.content);
                let matched = query_terms.iter().filter(|t| doc_terms.contains(t)).count();
                (matched > 0).then(|| Passage {
                    document_id: doc.id.clone(),
                    content: doc.content.clone(),
                    score: matched as f32 / query_terms.len() as f32,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn remove(&self, collection: &str, document_id: &str) -> Result<bool, RetrievalError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let len_before = docs.len();
        docs.retain(|d| d.id != document_id);
        Ok(docs.len() < len_before)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn best_match_first() {
        let index = InMemoryIndex::new();
        index
            .add(
                "c",
                vec![
                    IndexDocument::new("1", "The launch date moved to March"),
                    IndexDocument::new("2", "Launch budget approved for March"),
                ],
            )
            .await
            .unwrap();

        let results = index.query("c", "launch budget", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "2");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn unknown_collection_is_empty() {
        let index = InMemoryIndex::new();
        assert!(index.query("nope", "anything", 3).await.unwrap().is_empty());
        assert!(!index.remove("nope", "1").await.unwrap());
    }

    #[tokio::test]
    async fn drop_collection_forgets_documents() {
        let index = InMemoryIndex::new();
        index.add("c", vec![IndexDocument::new("1", "hiring plan")]).await.unwrap();
        assert_eq!(index.collection_count().await, 1);

        index.drop_collection("c").await.unwrap();
        assert_eq!(index.collection_count().await, 0);
        assert!(index.query("c", "hiring", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_adding_an_id_replaces_it() {
        let index = InMemoryIndex::new();
        index.add("c", vec![IndexDocument::new("1", "old text")]).await.unwrap();
        index.add("c", vec![IndexDocument::new("1", "new text")]).await.unwrap();
        let results = index.query("c", "text", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "new text");
    }
}
