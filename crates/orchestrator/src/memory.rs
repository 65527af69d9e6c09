//! Long-term memory: structured key/value facts and episodic session summaries.

use chrono::Utc;
use domgate_core::error::{Error, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{MemoryId, SessionId, UserId};
use domgate_core::model::{EpisodicMemory, StructuredMemory};
use domgate_store::{Database, Store};
use tracing::info;

/// Where a structured memory applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Visible to everyone in the tenant.
    Tenant,
    /// Private to the calling user.
    Personal,
}

pub struct MemoryService {
    db: Database,
}

impl MemoryService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_structured(
        &self,
        identity: &AuthenticatedUser,
        key: &str,
        value: serde_json::Value,
        description: Option<String>,
        scope: MemoryScope,
    ) -> Result<StructuredMemory> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation("key", "must not be blank"));
        }
        let owner = owner_for(identity, scope);
        if self.structured(identity).by_key(key, owner.as_ref()).await?.is_some() {
            return Err(Error::validation("key", format!("'{key}' already exists")));
        }

        let mut memory = StructuredMemory::new(key, value, owner);
        memory.description = description;
        let memory = self.structured(identity).create(memory).await?;
        info!(memory = %memory.id, key = %memory.key, "Structured memory created");
        Ok(memory)
    }

    pub async fn structured_by_key(
        &self,
        identity: &AuthenticatedUser,
        key: &str,
        scope: MemoryScope,
    ) -> Result<StructuredMemory> {
        let owner = owner_for(identity, scope);
        self.structured(identity)
            .by_key(key, owner.as_ref())
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "StructuredMemory",
                id: key.to_string(),
            })
    }

    /// Replace the value, and the description when one is given.
    pub async fn update_structured(
        &self,
        identity: &AuthenticatedUser,
        memory_id: &MemoryId,
        value: serde_json::Value,
        description: Option<String>,
    ) -> Result<StructuredMemory> {
        let mut memory = self.writable(identity, memory_id).await?;
        memory.value = value;
        if description.is_some() {
            memory.description = description;
        }
        memory.updated_at = Utc::now();
        self.structured(identity).update(&memory).await?;
        Ok(memory)
    }

    pub async fn delete_structured(&self, identity: &AuthenticatedUser, memory_id: &MemoryId) -> Result<()> {
        self.writable(identity, memory_id).await?;
        self.structured(identity).delete(memory_id.as_str()).await?;
        info!(memory = %memory_id, "Structured memory deleted");
        Ok(())
    }

    /// The summary recorded when the caller's session was reset, if any.
    pub async fn episodic_for_session(
        &self,
        identity: &AuthenticatedUser,
        session_id: &SessionId,
    ) -> Result<Option<EpisodicMemory>> {
        let memory = self.episodic(identity).for_session(session_id).await?;
        Ok(memory.filter(|m| identity.owns(&m.user_id)))
    }

    /// All of the caller's session summaries, newest first.
    pub async fn episodic_for_user(&self, identity: &AuthenticatedUser) -> Result<Vec<EpisodicMemory>> {
        Ok(self.episodic(identity).for_user(&identity.user_id).await?)
    }

    /// Tenant-wide entries are writable by anyone in the tenant, personal
    /// ones only by their owner.
    async fn writable(&self, identity: &AuthenticatedUser, memory_id: &MemoryId) -> Result<StructuredMemory> {
        let memory = self.structured(identity).get(memory_id.as_str()).await?;
        match &memory.user_id {
            Some(owner) if !identity.owns(owner) => Err(Error::authorization("Memory belongs to another user")),
            _ => Ok(memory),
        }
    }

    fn structured(&self, identity: &AuthenticatedUser) -> Store<StructuredMemory> {
        self.db.scoped(&identity.tenant_id)
    }

    fn episodic(&self, identity: &AuthenticatedUser) -> Store<EpisodicMemory> {
        self.db.scoped(&identity.tenant_id)
    }
}

fn owner_for(identity: &AuthenticatedUser, scope: MemoryScope) -> Option<UserId> {
    match scope {
        MemoryScope::Tenant => None,
        MemoryScope::Personal => Some(identity.user_id.clone()),
    }
}
