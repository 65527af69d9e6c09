//! Retrieval index trait: keyword-ranked passage storage.
//!
//! An index holds named collections. The retrieval router decides which
//! collection a (tenant, scope) pair maps to; the index only stores and ranks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::ids::SessionId;

/// Fixed answer meaning "no relevant information". Models are instructed to
/// reply with exactly this text when the context does not contain an answer.
pub const NO_ANSWER_SENTINEL: &str = "分かりません";

/// Which index a retrieval call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "session_id")]
pub enum RetrievalScope {
    /// The tenant's durable index.
    Global,
    /// The ephemeral index of one chat session.
    Session(SessionId),
}

/// Result of a retrieval query. "Nothing relevant" is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Answer(String),
    NoAnswer,
}

impl RetrievalOutcome {
    /// Classify backend text, mapping the sentinel to [`RetrievalOutcome::NoAnswer`].
    pub fn from_backend_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == NO_ANSWER_SENTINEL {
            Self::NoAnswer
        } else {
            Self::Answer(trimmed.to_string())
        }
    }

    pub fn is_no_answer(&self) -> bool {
        matches!(self, Self::NoAnswer)
    }
}

/// A document handed to an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Caller-chosen id; the knowledge ingestor uses the metadata row id.
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// A ranked passage returned by a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: String,
    pub content: String,
    /// Higher is more relevant.
    pub score: f32,
}

/// Implementations: SQLite FTS5, in-memory (for testing).
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append documents to a collection, creating it if needed. Returns the
    /// number of documents stored.
    async fn add(&self, collection: &str, documents: Vec<IndexDocument>) -> std::result::Result<usize, RetrievalError>;

    /// Rank the collection's documents against `text`, best first.
    /// Returns no passages when nothing matches or the collection is unknown.
    async fn query(&self, collection: &str, text: &str, limit: usize) -> std::result::Result<Vec<Passage>, RetrievalError>;

    /// Remove one document. Returns whether it existed.
    async fn remove(&self, collection: &str, document_id: &str) -> std::result::Result<bool, RetrievalError>;

    /// Drop a whole collection.
    async fn drop_collection(&self, collection: &str) -> std::result::Result<(), RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_text_is_no_answer() {
        assert!(RetrievalOutcome::from_backend_text(NO_ANSWER_SENTINEL).is_no_answer());
        assert!(RetrievalOutcome::from_backend_text(&format!("  {NO_ANSWER_SENTINEL}\n")).is_no_answer());
        assert!(RetrievalOutcome::from_backend_text("").is_no_answer());
    }

    #[test]
    fn other_text_is_an_answer() {
        assert_eq!(
            RetrievalOutcome::from_backend_text(" The budget is 40k. "),
            RetrievalOutcome::Answer("The budget is 40k.".into())
        );
    }

    #[test]
    fn scope_serializes_with_tag() {
        let json = serde_json::to_value(RetrievalScope::Session(SessionId::from("s1"))).unwrap();
        assert_eq!(json["scope"], "session");
        assert_eq!(json["session_id"], "s1");
    }
}
