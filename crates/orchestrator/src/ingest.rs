//! Knowledge ingestion.
//!
//! An upload lands in two places: the retrieval index (durable, or the
//! session's ephemeral index) and the `knowledge_documents` metadata table.
//! The two writes cannot share a transaction, so they run as a saga:
//!
//! 1. add the text to the index (re-adding the same id replaces it)
//! 2. insert the metadata row
//! 3. if step 2 fails, remove the index entry again and report the error
//!
//! Text extraction happens before ingestion; uploads carry extracted text.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use domgate_config::AppConfig;
use domgate_core::error::{Error, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{DocumentId, SessionId};
use domgate_core::model::{ChatSession, KnowledgeDocument};
use domgate_core::retrieval::{IndexDocument, RetrievalScope};
use domgate_retrieval::RetrievalHub;
use domgate_store::{Database, Store};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

/// A document submitted for ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub file_name: String,
    /// Extracted text.
    pub content: String,
    /// Size of the original file; the text length when omitted.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Ingest into this session's ephemeral index instead of the durable one.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size_bytes: u64,
    /// Lowercase, without the dot.
    pub allowed_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_file_size_bytes: config.uploads.max_file_size_bytes(),
            allowed_extensions: config.uploads.allowed_extensions.clone(),
        }
    }

    /// Check name, type and size. Returns the lowercase extension and the size.
    fn check(&self, upload: &Upload) -> Result<(String, u64)> {
        let name = upload.file_name.trim();
        if name.is_empty() {
            return Err(Error::validation("file_name", "no file name provided"));
        }

        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(Error::validation(
                "file_name",
                format!(
                    "file type '{extension}' not allowed, allowed types are: {}",
                    self.allowed_extensions.join(", ")
                ),
            ));
        }

        // The declared size is a client hint; the text itself is never undercounted.
        let size = upload.file_size.unwrap_or(0).max(upload.content.len() as u64);
        if size > self.max_file_size_bytes {
            return Err(Error::validation(
                "file_size",
                format!(
                    "file size exceeds the limit of {}MB",
                    self.max_file_size_bytes / (1024 * 1024)
                ),
            ));
        }

        if upload.content.trim().is_empty() {
            return Err(Error::validation("content", "no text was extracted from the file"));
        }
        Ok((extension, size))
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct KnowledgeIngestor {
    db: Database,
    retrieval: Arc<RetrievalHub>,
    policy: UploadPolicy,
}

impl KnowledgeIngestor {
    pub fn new(db: Database, retrieval: Arc<RetrievalHub>, policy: UploadPolicy) -> Self {
        Self { db, retrieval, policy }
    }

    pub async fn ingest(&self, identity: &AuthenticatedUser, upload: Upload) -> Result<KnowledgeDocument> {
        let (extension, file_size) = self.policy.check(&upload)?;

        let scope = match &upload.session_id {
            Some(session_id) => {
                let session = self
                    .db
                    .scoped::<ChatSession>(&identity.tenant_id)
                    .get(session_id.as_str())
                    .await?;
                if !identity.owns(&session.user_id) {
                    return Err(Error::authorization("Session belongs to another user"));
                }
                RetrievalScope::Session(session_id.clone())
            }
            None => RetrievalScope::Global,
        };

        let id = DocumentId::new();
        let document = KnowledgeDocument {
            file_path: format!("uploads/{}/{id}.{extension}", identity.tenant_id),
            id,
            tenant_id: identity.tenant_id.clone(),
            session_id: upload.session_id.clone(),
            file_name: upload.file_name.trim().to_string(),
            file_type: mime_type(&extension),
            file_size,
            uploaded_by: identity.user_id.clone(),
            is_active: true,
            created_at: Utc::now(),
        };

        let mut entry = IndexDocument::new(document.id.as_str(), upload.content);
        entry.metadata = index_metadata(&document);

        let router = self.retrieval.for_tenant(&identity.tenant_id);
        router.add(&scope, vec![entry]).await?;

        match self.documents(identity).create(document.clone()).await {
            Ok(stored) => {
                info!(
                    document = %stored.id,
                    tenant = %identity.tenant_id,
                    scope = ?scope,
                    "Knowledge document ingested"
                );
                Ok(stored)
            }
            Err(e) => {
                warn!(document = %document.id, error = %e, "Metadata write failed, removing index entry");
                if let Err(undo) = router.remove(&scope, document.id.as_str()).await {
                    error!(document = %document.id, error = %undo, "Index compensation failed");
                }
                Err(e.into())
            }
        }
    }

    /// Administrator listing, optionally filtered by file name.
    pub async fn search(
        &self,
        identity: &AuthenticatedUser,
        file_name: Option<&str>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<KnowledgeDocument>> {
        identity.require_admin()?;
        Ok(self
            .documents(identity)
            .search_by_name(file_name, skip, limit.clamp(1, 100))
            .await?)
    }

    fn documents(&self, identity: &AuthenticatedUser) -> Store<KnowledgeDocument> {
        self.db.scoped(&identity.tenant_id)
    }
}

fn mime_type(extension: &str) -> String {
    match extension {
        "pdf" => "application/pdf".into(),
        "txt" => "text/plain".into(),
        "md" => "text/markdown".into(),
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".into(),
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation".into(),
        other => format!("application/{other}"),
    }
}

fn index_metadata(document: &KnowledgeDocument) -> serde_json::Map<String, serde_json::Value> {
    let value = json!({
        "document_id": document.id,
        "tenant_id": document.tenant_id,
        "file_name": document.file_name,
        "file_type": document.file_type,
        "uploaded_by": document.uploaded_by,
        "session_id": document.session_id,
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
