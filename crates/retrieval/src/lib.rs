//! Retrieval for the DOM gateway.
//!
//! - [`SqliteIndex`]: durable FTS5 index sharing the application database
//! - [`InMemoryIndex`]: process-local index for tests and throwaway runs
//! - [`RetrievalRouter`]: per-tenant routing between the durable and the
//!   per-session ephemeral collections, plus strict-context answering
//! - [`RetrievalHub`]: one router per tenant

pub mod in_memory;
pub mod router;
pub mod sqlite;
mod text;

use std::sync::Arc;

use domgate_core::error::RetrievalError;
use domgate_core::retrieval::RetrievalIndex;
use sqlx::SqlitePool;

pub use in_memory::InMemoryIndex;
pub use router::{RetrievalHub, RetrievalRouter, RetrievalSettings};
pub use sqlite::SqliteIndex;

/// Open the index backend named in `[retrieval] backend`.
pub async fn open_index(backend: &str, pool: SqlitePool) -> Result<Arc<dyn RetrievalIndex>, RetrievalError> {
    match backend {
        "sqlite" => Ok(Arc::new(SqliteIndex::from_pool(pool).await?)),
        "in_memory" | "memory" => Ok(Arc::new(InMemoryIndex::new())),
        other => Err(RetrievalError::Index(format!("unknown retrieval backend '{other}'"))),
    }
}
