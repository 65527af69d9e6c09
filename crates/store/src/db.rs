//! SQLite connection pool and schema bootstrap.
//!
//! One database file holds every tenant. Isolation is enforced by the
//! [`Store`] layer, never by separate files, so every tenant-scoped table
//! carries an indexed `tenant_id` column.

use std::str::FromStr;

use domgate_core::TenantId;
use domgate_core::error::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info};

use crate::entity::{Entity, SystemScoped};
use crate::scoped::{Scope, Store, UnitOfWork};

const SCHEMA: &[(&str, &str)] = &[
    (
        "tenants table",
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL UNIQUE,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id               TEXT PRIMARY KEY NOT NULL,
            tenant_id        TEXT NOT NULL REFERENCES tenants(id),
            email            TEXT NOT NULL UNIQUE,
            hashed_password  TEXT NOT NULL,
            is_active        INTEGER NOT NULL DEFAULT 1,
            is_admin         INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        )
        "#,
    ),
    (
        "chat_sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id          TEXT PRIMARY KEY NOT NULL,
            tenant_id   TEXT NOT NULL REFERENCES tenants(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            title       TEXT,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "chat_messages table",
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id            TEXT PRIMARY KEY NOT NULL,
            tenant_id     TEXT NOT NULL REFERENCES tenants(id),
            session_id    TEXT NOT NULL REFERENCES chat_sessions(id),
            role          TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
            content       TEXT NOT NULL,
            raw_response  TEXT,
            created_at    TEXT NOT NULL
        )
        "#,
    ),
    (
        "episodic_memories table",
        r#"
        CREATE TABLE IF NOT EXISTS episodic_memories (
            id           TEXT PRIMARY KEY NOT NULL,
            tenant_id    TEXT NOT NULL REFERENCES tenants(id),
            user_id      TEXT NOT NULL REFERENCES users(id),
            session_id   TEXT NOT NULL REFERENCES chat_sessions(id),
            summary      TEXT NOT NULL,
            decisions    TEXT NOT NULL DEFAULT '[]',
            assumptions  TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL
        )
        "#,
    ),
    (
        "structured_memories table",
        r#"
        CREATE TABLE IF NOT EXISTS structured_memories (
            id           TEXT PRIMARY KEY NOT NULL,
            tenant_id    TEXT NOT NULL REFERENCES tenants(id),
            user_id      TEXT REFERENCES users(id),
            key          TEXT NOT NULL,
            value        TEXT NOT NULL,
            description  TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        )
        "#,
    ),
    (
        "knowledge_documents table",
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_documents (
            id           TEXT PRIMARY KEY NOT NULL,
            tenant_id    TEXT NOT NULL REFERENCES tenants(id),
            session_id   TEXT REFERENCES chat_sessions(id),
            file_name    TEXT NOT NULL,
            file_path    TEXT NOT NULL UNIQUE,
            file_type    TEXT NOT NULL,
            file_size    INTEGER NOT NULL,
            uploaded_by  TEXT NOT NULL REFERENCES users(id),
            is_active    INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL
        )
        "#,
    ),
    (
        "feedback table",
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id          TEXT PRIMARY KEY NOT NULL,
            tenant_id   TEXT NOT NULL REFERENCES tenants(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            session_id  TEXT REFERENCES chat_sessions(id),
            message_id  TEXT REFERENCES chat_messages(id),
            rating      INTEGER NOT NULL CHECK (rating BETWEEN -1 AND 1),
            comment     TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "user_settings table",
        r#"
        CREATE TABLE IF NOT EXISTS user_settings (
            id                   TEXT PRIMARY KEY NOT NULL,
            tenant_id            TEXT NOT NULL REFERENCES tenants(id),
            user_id              TEXT NOT NULL REFERENCES users(id),
            theme                TEXT NOT NULL DEFAULT 'light',
            language             TEXT NOT NULL DEFAULT 'ja',
            font_size            TEXT NOT NULL DEFAULT 'medium',
            llm_profile          TEXT,
            has_seen_onboarding  INTEGER NOT NULL DEFAULT 0,
            onboarding_skipped   INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            UNIQUE (tenant_id, user_id)
        )
        "#,
    ),
    (
        "session owner index",
        "CREATE INDEX IF NOT EXISTS idx_chat_sessions_owner ON chat_sessions(tenant_id, user_id)",
    ),
    (
        "message order index",
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, created_at)",
    ),
    (
        "episodic session index",
        "CREATE INDEX IF NOT EXISTS idx_episodic_session ON episodic_memories(tenant_id, session_id)",
    ),
    (
        "episodic user index",
        "CREATE INDEX IF NOT EXISTS idx_episodic_user ON episodic_memories(tenant_id, user_id, created_at DESC)",
    ),
    (
        "structured key index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_structured_key ON structured_memories(tenant_id, IFNULL(user_id, ''), key)",
    ),
    (
        "feedback session index",
        "CREATE INDEX IF NOT EXISTS idx_feedback_session ON feedback(tenant_id, session_id)",
    ),
    (
        "feedback message index",
        "CREATE INDEX IF NOT EXISTS idx_feedback_message ON feedback(tenant_id, message_id)",
    ),
    (
        "document tenant index",
        "CREATE INDEX IF NOT EXISTS idx_knowledge_tenant ON knowledge_documents(tenant_id, created_at)",
    ),
];

/// Shared handle to the gateway database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url` and bootstrap the schema.
    ///
    /// Pass `"sqlite::memory:"` for an in-process database (useful for tests).
    /// In-memory databases are pinned to a single connection so every
    /// caller sees the same data.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            // The data lives only as long as its connection.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!(url, max_connections, "Database initialized");
        Ok(db)
    }

    /// Fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (label, sql) in SCHEMA {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }
        debug!(statements = SCHEMA.len(), "SQLite migrations complete");
        Ok(())
    }

    /// A store of `E` confined to `tenant`.
    pub fn scoped<E: Entity>(&self, tenant: &TenantId) -> Store<E> {
        Store::new(self.pool.clone(), Scope::Tenant(tenant.clone()))
    }

    /// An unfiltered store, available only for identity bootstrap entities.
    pub fn system<E: SystemScoped>(&self) -> Store<E> {
        Store::new(self.pool.clone(), Scope::System)
    }

    /// Begin a transaction whose writes are all confined to `tenant`.
    pub async fn unit_of_work(&self, tenant: &TenantId) -> Result<UnitOfWork, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;
        Ok(UnitOfWork::new(tx, tenant.clone()))
    }
}
