//! SQLite index with FTS5 full-text search.
//!
//! Two tables back every collection:
//! - `index_passages`: the raw documents, keyed by (collection, document_id)
//! - `index_passages_fts`: FTS5 virtual table for ranked keyword search (BM25)
//!
//! Triggers keep the FTS index in sync on insert/delete/update.

use async_trait::async_trait;
use domgate_core::error::RetrievalError;
use domgate_core::retrieval::{IndexDocument, Passage, RetrievalIndex};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::text;

/// A durable retrieval index stored next to the application tables.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Create the index on an existing pool. Tables and triggers are
    /// created if missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RetrievalError> {
        let index = Self { pool };
        index.run_migrations().await?;
        Ok(index)
    }

    async fn run_migrations(&self) -> Result<(), RetrievalError> {
        // Integer rowid alias for FTS5 sync
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_passages (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection   TEXT NOT NULL,
                document_id  TEXT NOT NULL,
                content      TEXT NOT NULL,
                metadata     TEXT NOT NULL DEFAULT '{}',
                UNIQUE (collection, document_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("index_passages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS index_passages_fts USING fts5(
                content,
                content='index_passages',
                content_rowid='iid',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("FTS5 table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS index_passages_ai AFTER INSERT ON index_passages BEGIN
                INSERT INTO index_passages_fts(rowid, content) VALUES (new.iid, new.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("insert trigger: {e}")))?;

        // External-content tables need the special 'delete' command
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS index_passages_ad AFTER DELETE ON index_passages BEGIN
                INSERT INTO index_passages_fts(index_passages_fts, rowid, content)
                VALUES ('delete', old.iid, old.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("delete trigger: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS index_passages_au AFTER UPDATE ON index_passages BEGIN
                INSERT INTO index_passages_fts(index_passages_fts, rowid, content)
                VALUES ('delete', old.iid, old.content);
                INSERT INTO index_passages_fts(rowid, content) VALUES (new.iid, new.content);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("update trigger: {e}")))?;

        Ok(())
    }

    /// Build an FTS5 query from user text: quoted prefix terms joined with
    /// OR so that BM25 ranks partial matches instead of dropping them.
    fn sanitize_fts_query(text: &str) -> String {
        text::terms(text)
            .into_iter()
            .map(|term| format!("\"{term}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[async_trait]
impl RetrievalIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn add(&self, collection: &str, documents: Vec<IndexDocument>) -> Result<usize, RetrievalError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RetrievalError::Index(format!("begin: {e}")))?;

        let count = documents.len();
        for doc in documents {
            let metadata = serde_json::to_string(&doc.metadata)
                .map_err(|e| RetrievalError::Index(format!("metadata for {}: {e}", doc.id)))?;
            sqlx::query(
                r#"
                INSERT INTO index_passages (collection, document_id, content, metadata)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(collection, document_id) DO UPDATE SET
                    content = excluded.content,
                    metadata = excluded.metadata
                "#,
            )
            .bind(collection)
            .bind(&doc.id)
            .bind(&doc.content)
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| RetrievalError::Index(format!("insert {}: {e}", doc.id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| RetrievalError::Index(format!("commit: {e}")))?;
        debug!(collection, count, "Indexed documents");
        Ok(count)
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        let fts_query = Self::sanitize_fts_query(text);
        if fts_query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT p.document_id, p.content, bm25(index_passages_fts) AS rank
            FROM index_passages_fts f
            JOIN index_passages p ON p.iid = f.rowid
            WHERE index_passages_fts MATCH ?1 AND p.collection = ?2
            ORDER BY rank
            LIMIT ?3
            "#,
        )
        .bind(&fts_query)
        .bind(collection)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RetrievalError::Index(format!("FTS5 search: {e}")))?;

        rows.iter()
            .map(|row| {
                // bm25() is negative, lower is better
                let rank: f64 = row.try_get("rank").unwrap_or(0.0);
                Ok(Passage {
                    document_id: row
                        .try_get("document_id")
                        .map_err(|e| RetrievalError::Index(format!("document_id: {e}")))?,
                    content: row
                        .try_get("content")
                        .map_err(|e| RetrievalError::Index(format!("content: {e}")))?,
                    score: (-rank) as f32,
                })
            })
            .collect()
    }

    async fn remove(&self, collection: &str, document_id: &str) -> Result<bool, RetrievalError> {
        let result = sqlx::query("DELETE FROM index_passages WHERE collection = ?1 AND document_id = ?2")
            .bind(collection)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RetrievalError::Index(format!("delete {document_id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        let result = sqlx::query("DELETE FROM index_passages WHERE collection = ?1")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(|e| RetrievalError::Index(format!("drop {collection}: {e}")))?;
        debug!(collection, removed = result.rows_affected(), "Dropped collection");
        Ok(())
    }
}
