//! Entity-specific lookups layered on the generic store.

use domgate_core::error::StoreError;
use domgate_core::{
    ChatMessage, ChatSession, EpisodicMemory, Feedback, KnowledgeDocument, MessageId, SessionId,
    StructuredMemory, Tenant, User, UserId, UserSettings,
};

use crate::scoped::{Filter, Store};

impl Store<Tenant> {
    pub async fn by_name(&self, name: &str) -> Result<Option<Tenant>, StoreError> {
        self.first(Filter::new().eq("name", name)).await
    }
}

impl Store<User> {
    pub async fn by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.first(Filter::new().eq("email", email)).await
    }
}

impl Store<ChatSession> {
    /// Every session of `user`, newest first, active or not.
    pub async fn for_user(&self, user_id: &UserId) -> Result<Vec<ChatSession>, StoreError> {
        self.list(
            Filter::new()
                .eq("user_id", user_id.as_str())
                .order_by_desc("created_at"),
        )
        .await
    }
}

impl Store<ChatMessage> {
    /// The transcript of a session in creation order.
    pub async fn for_session(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, StoreError> {
        self.list(
            Filter::new()
                .eq("session_id", session_id.as_str())
                .order_by("created_at"),
        )
        .await
    }
}

impl Store<EpisodicMemory> {
    pub async fn for_session(&self, session_id: &SessionId) -> Result<Option<EpisodicMemory>, StoreError> {
        self.first(Filter::new().eq("session_id", session_id.as_str())).await
    }

    /// Newest first.
    pub async fn for_user(&self, user_id: &UserId) -> Result<Vec<EpisodicMemory>, StoreError> {
        self.list(
            Filter::new()
                .eq("user_id", user_id.as_str())
                .order_by_desc("created_at"),
        )
        .await
    }
}

impl Store<StructuredMemory> {
    /// Lookup by key. `user_id = None` addresses the tenant-wide entry,
    /// not "any user".
    pub async fn by_key(&self, key: &str, user_id: Option<&UserId>) -> Result<Option<StructuredMemory>, StoreError> {
        let filter = Filter::new().eq("key", key);
        let filter = match user_id {
            Some(user) => filter.eq("user_id", user.as_str()),
            None => filter.is_null("user_id"),
        };
        self.first(filter).await
    }
}

impl Store<KnowledgeDocument> {
    /// Case-insensitive file-name search, newest first.
    pub async fn search_by_name(&self, needle: Option<&str>, skip: u32, limit: u32) -> Result<Vec<KnowledgeDocument>, StoreError> {
        let mut filter = Filter::new();
        if let Some(needle) = needle.filter(|n| !n.trim().is_empty()) {
            filter = filter.contains("file_name", needle.trim());
        }
        self.list(filter.order_by_desc("created_at").offset(skip).limit(limit))
            .await
    }
}

impl Store<Feedback> {
    /// `user`'s feedback within a session, oldest first.
    pub async fn for_session(&self, session_id: &SessionId, user_id: &UserId) -> Result<Vec<Feedback>, StoreError> {
        self.list(
            Filter::new()
                .eq("session_id", session_id.as_str())
                .eq("user_id", user_id.as_str())
                .order_by("created_at"),
        )
        .await
    }

    /// The most recent rating `user` gave a message.
    pub async fn for_message(&self, message_id: &MessageId, user_id: &UserId) -> Result<Option<Feedback>, StoreError> {
        self.first(
            Filter::new()
                .eq("message_id", message_id.as_str())
                .eq("user_id", user_id.as_str())
                .order_by_desc("created_at"),
        )
        .await
    }
}

impl Store<UserSettings> {
    pub async fn for_user(&self, user_id: &UserId) -> Result<Option<UserSettings>, StoreError> {
        self.first(Filter::new().eq("user_id", user_id.as_str())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use domgate_core::{Role, TenantId};

    async fn seed(db: &Database) -> (Tenant, User) {
        let tenant = db.system::<Tenant>().create(Tenant::new("acme")).await.unwrap();
        let mut user = User::new("a@acme.test", "x", false);
        user.tenant_id = tenant.id.clone();
        let user = db.system::<User>().create(user).await.unwrap();
        (tenant, user)
    }

    #[tokio::test]
    async fn bootstrap_lookups() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;

        let found = db.system::<Tenant>().by_name("acme").await.unwrap().unwrap();
        assert_eq!(found.id, tenant.id);
        let found = db.system::<User>().by_email("a@acme.test").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(db.system::<User>().by_email("b@acme.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transcript_is_in_creation_order() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;
        let session = db
            .scoped::<ChatSession>(&tenant.id)
            .create(ChatSession::new(user.id, None))
            .await
            .unwrap();

        let messages = db.scoped::<ChatMessage>(&tenant.id);
        for (role, text) in [(Role::User, "one"), (Role::Assistant, "two"), (Role::User, "three")] {
            messages
                .create(ChatMessage::new(session.id.clone(), role, text))
                .await
                .unwrap();
        }

        let transcript = messages.for_session(&session.id).await.unwrap();
        let texts: Vec<_> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn structured_keys_are_scoped_by_user() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;
        let memories = db.scoped::<StructuredMemory>(&tenant.id);

        memories
            .create(StructuredMemory::new("tone", serde_json::json!("formal"), None))
            .await
            .unwrap();
        memories
            .create(StructuredMemory::new("tone", serde_json::json!("casual"), Some(user.id.clone())))
            .await
            .unwrap();

        let shared = memories.by_key("tone", None).await.unwrap().unwrap();
        assert_eq!(shared.value, serde_json::json!("formal"));
        let personal = memories.by_key("tone", Some(&user.id)).await.unwrap().unwrap();
        assert_eq!(personal.value, serde_json::json!("casual"));

        // Same (tenant, user, key) twice violates the unique index.
        let dup = memories
            .create(StructuredMemory::new("tone", serde_json::json!("x"), None))
            .await;
        assert!(matches!(dup, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn feedback_lookups_are_per_user() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;
        let session = db
            .scoped::<ChatSession>(&tenant.id)
            .create(ChatSession::new(user.id.clone(), None))
            .await
            .unwrap();
        let message = db
            .scoped::<ChatMessage>(&tenant.id)
            .create(ChatMessage::new(session.id.clone(), Role::Assistant, "Go with B."))
            .await
            .unwrap();

        let store = db.scoped::<Feedback>(&tenant.id);
        let mut rating = Feedback::new(user.id.clone(), 1);
        rating.session_id = Some(session.id.clone());
        rating.message_id = Some(message.id.clone());
        rating.comment = Some("clear".into());
        store.create(rating).await.unwrap();

        assert_eq!(store.for_session(&session.id, &user.id).await.unwrap().len(), 1);
        let found = store.for_message(&message.id, &user.id).await.unwrap().unwrap();
        assert_eq!(found.rating, 1);
        assert_eq!(found.comment.as_deref(), Some("clear"));

        let stranger = UserId::new();
        assert!(store.for_session(&session.id, &stranger).await.unwrap().is_empty());
        assert!(store.for_message(&message.id, &stranger).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_are_unique_per_user() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;
        let store = db.scoped::<UserSettings>(&tenant.id);
        assert!(store.for_user(&user.id).await.unwrap().is_none());

        let mut settings = UserSettings::defaults_for(TenantId::unassigned(), user.id.clone());
        settings.id = domgate_core::SettingsId::new();
        settings.theme = domgate_core::Theme::Dark;
        store.create(settings.clone()).await.unwrap();
        let stored = store.for_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.theme, domgate_core::Theme::Dark);

        settings.id = domgate_core::SettingsId::new();
        assert!(matches!(store.create(settings).await, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn episodic_memories_round_trip_lists() {
        let db = Database::in_memory().await.unwrap();
        let (tenant, user) = seed(&db).await;
        let session = db
            .scoped::<ChatSession>(&tenant.id)
            .create(ChatSession::new(user.id.clone(), None))
            .await
            .unwrap();

        let mut memory = EpisodicMemory::new(user.id.clone(), session.id.clone(), "We chose vendor B.");
        memory.decisions = vec!["vendor B".into()];
        db.scoped::<EpisodicMemory>(&tenant.id).create(memory).await.unwrap();

        let stored = db
            .scoped::<EpisodicMemory>(&tenant.id)
            .for_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.decisions, vec!["vendor B".to_string()]);
        assert!(stored.assumptions.is_empty());

        let other = db.scoped::<EpisodicMemory>(&TenantId::new());
        assert!(other.for_user(&user.id).await.unwrap().is_empty());
    }
}
