//! Retrieval router: maps a (tenant, scope) pair to exactly one collection
//! and answers questions strictly from that collection's passages.
//!
//! Each tenant owns one durable collection and any number of ephemeral
//! per-session collections. Ephemeral collections are created on first
//! upload, expire after an idle TTL, and are evicted least-recently-used
//! once the per-tenant cap is reached. A session scope never falls back to
//! the durable collection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domgate_config::AppConfig;
use domgate_core::error::RetrievalError;
use domgate_core::ids::{SessionId, TenantId};
use domgate_core::message::Message;
use domgate_core::provider::{Provider, ProviderRequest};
use domgate_core::retrieval::{
    IndexDocument, NO_ANSWER_SENTINEL, Passage, RetrievalIndex, RetrievalOutcome, RetrievalScope,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Router settings derived from the application config.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub collection_prefix: String,
    pub top_k: usize,
    pub ephemeral_ttl: Duration,
    pub max_ephemeral_sessions: usize,
    /// Model used to phrase answers from retrieved passages.
    pub model: String,
}

impl RetrievalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            collection_prefix: config.retrieval.collection_prefix.clone(),
            top_k: config.retrieval.top_k,
            ephemeral_ttl: Duration::from_secs(config.retrieval.ephemeral_ttl_secs),
            max_ephemeral_sessions: config.retrieval.max_ephemeral_sessions,
            model: config.default_model.clone(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ── Ephemeral registry ─────────────────────────────────────────────────

/// Last-use times of the live ephemeral collections of one tenant.
struct EphemeralRegistry {
    last_used: HashMap<SessionId, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl EphemeralRegistry {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            last_used: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Forget every entry idle for longer than the TTL.
    fn expire(&mut self, now: Instant) -> Vec<SessionId> {
        let ttl = self.ttl;
        let expired: Vec<SessionId> = self
            .last_used
            .iter()
            .filter(|(_, used)| now.duration_since(**used) > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.last_used.remove(id);
        }
        expired
    }

    /// Mark a live entry as used. Returns false when it does not exist.
    fn touch(&mut self, session: &SessionId, now: Instant) -> bool {
        match self.last_used.get_mut(session) {
            Some(used) => {
                *used = now;
                true
            }
            None => false,
        }
    }

    /// Register (or refresh) an entry, evicting the least recently used
    /// ones if the cap would be exceeded. Returns the evicted sessions.
    fn open(&mut self, session: &SessionId, now: Instant) -> Vec<SessionId> {
        if self.touch(session, now) {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        while self.last_used.len() >= self.capacity {
            let Some(oldest) = self
                .last_used
                .iter()
                .min_by_key(|(_, used)| **used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.last_used.remove(&oldest);
            evicted.push(oldest);
        }
        self.last_used.insert(session.clone(), now);
        evicted
    }

    fn contains(&self, session: &SessionId) -> bool {
        self.last_used.contains_key(session)
    }

    fn len(&self) -> usize {
        self.last_used.len()
    }
}

// ── Router ─────────────────────────────────────────────────────────────

/// Retrieval for one tenant.
pub struct RetrievalRouter {
    tenant_id: TenantId,
    index: Arc<dyn RetrievalIndex>,
    provider: Arc<dyn Provider>,
    settings: RetrievalSettings,
    // Held across collection drops and ephemeral writes so an eviction can
    // never race a re-creation of the same collection.
    ephemeral: Mutex<EphemeralRegistry>,
}

impl RetrievalRouter {
    pub fn new(
        tenant_id: TenantId,
        index: Arc<dyn RetrievalIndex>,
        provider: Arc<dyn Provider>,
        settings: RetrievalSettings,
    ) -> Self {
        let ephemeral = EphemeralRegistry::new(settings.ephemeral_ttl, settings.max_ephemeral_sessions);
        Self {
            tenant_id,
            index,
            provider,
            settings,
            ephemeral: Mutex::new(ephemeral),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// `{prefix}_{tenant}` with dashes folded to underscores.
    pub fn durable_collection(&self) -> String {
        format!(
            "{}_{}",
            self.settings.collection_prefix,
            self.tenant_id.as_str().replace('-', "_")
        )
    }

    /// `{durable}_ephemeral_{session}`.
    pub fn ephemeral_collection(&self, session_id: &SessionId) -> String {
        format!(
            "{}_ephemeral_{}",
            self.durable_collection(),
            session_id.as_str().replace('-', "_")
        )
    }

    /// Index documents into the collection selected by `scope`. A session
    /// scope creates that session's ephemeral collection if needed.
    pub async fn add(&self, scope: &RetrievalScope, documents: Vec<IndexDocument>) -> Result<usize, RetrievalError> {
        match scope {
            RetrievalScope::Global => self.index.add(&self.durable_collection(), documents).await,
            RetrievalScope::Session(session_id) => {
                let mut registry = self.ephemeral.lock().await;
                let now = Instant::now();
                let mut stale = registry.expire(now);
                stale.extend(registry.open(session_id, now));
                self.drop_collections(&stale).await;

                let added = self
                    .index
                    .add(&self.ephemeral_collection(session_id), documents)
                    .await?;
                debug!(tenant = %self.tenant_id, session = %session_id, added, "Ephemeral documents indexed");
                Ok(added)
            }
        }
    }

    /// Remove a document from the collection selected by `scope`.
    pub async fn remove(&self, scope: &RetrievalScope, document_id: &str) -> Result<bool, RetrievalError> {
        match scope {
            RetrievalScope::Global => self.index.remove(&self.durable_collection(), document_id).await,
            RetrievalScope::Session(session_id) => {
                let registry = self.ephemeral.lock().await;
                if !registry.contains(session_id) {
                    return Ok(false);
                }
                self.index
                    .remove(&self.ephemeral_collection(session_id), document_id)
                    .await
            }
        }
    }

    /// Answer `text` from the collection selected by `scope` only.
    ///
    /// Returns [`RetrievalOutcome::NoAnswer`] when the session has no live
    /// ephemeral collection, when nothing in the collection matches, or when
    /// the model replies with the no-answer sentinel.
    pub async fn query(&self, text: &str, scope: &RetrievalScope) -> Result<RetrievalOutcome, RetrievalError> {
        let collection = match scope {
            RetrievalScope::Global => self.durable_collection(),
            RetrievalScope::Session(session_id) => {
                let mut registry = self.ephemeral.lock().await;
                let now = Instant::now();
                let expired = registry.expire(now);
                self.drop_collections(&expired).await;
                if !registry.touch(session_id, now) {
                    debug!(tenant = %self.tenant_id, session = %session_id, "No ephemeral index for session");
                    return Ok(RetrievalOutcome::NoAnswer);
                }
                self.ephemeral_collection(session_id)
            }
        };

        let passages = self.index.query(&collection, text, self.settings.top_k).await?;
        if passages.is_empty() {
            debug!(collection = %collection, "No passages matched");
            return Ok(RetrievalOutcome::NoAnswer);
        }
        self.answer(text, &passages).await
    }

    /// Number of live ephemeral collections.
    pub async fn ephemeral_session_count(&self) -> usize {
        self.ephemeral.lock().await.len()
    }

    async fn answer(&self, question: &str, passages: &[Passage]) -> Result<RetrievalOutcome, RetrievalError> {
        let context = passages
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut request = ProviderRequest::new(
            self.settings.model.clone(),
            vec![
                Message::system(format!(
                    "Answer the question using only the context provided. \
                     If the context does not contain the answer, reply with exactly \
                     \"{NO_ANSWER_SENTINEL}\" and nothing else."
                )),
                Message::user(format!("Context:\n{context}\n\nQuestion: {question}")),
            ],
        );
        request.temperature = 0.0;

        let response = self.provider.complete(request).await?;
        Ok(RetrievalOutcome::from_backend_text(&response.message.content))
    }

    async fn drop_collections(&self, sessions: &[SessionId]) {
        for session_id in sessions {
            let collection = self.ephemeral_collection(session_id);
            match self.index.drop_collection(&collection).await {
                Ok(()) => info!(tenant = %self.tenant_id, session = %session_id, "Ephemeral index released"),
                Err(e) => warn!(collection = %collection, error = %e, "Failed to drop ephemeral index"),
            }
        }
    }
}

// ── Hub ────────────────────────────────────────────────────────────────

/// Hands out one router per tenant, all sharing the same index and provider.
pub struct RetrievalHub {
    index: Arc<dyn RetrievalIndex>,
    provider: Arc<dyn Provider>,
    settings: RetrievalSettings,
    routers: std::sync::Mutex<HashMap<TenantId, Arc<RetrievalRouter>>>,
}

impl RetrievalHub {
    pub fn new(index: Arc<dyn RetrievalIndex>, provider: Arc<dyn Provider>, settings: RetrievalSettings) -> Self {
        Self {
            index,
            provider,
            settings,
            routers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn for_tenant(&self, tenant_id: &TenantId) -> Arc<RetrievalRouter> {
        let mut routers = self.routers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        routers
            .entry(tenant_id.clone())
            .or_insert_with(|| {
                debug!(tenant = %tenant_id, index = self.index.name(), "Retrieval router created");
                Arc::new(RetrievalRouter::new(
                    tenant_id.clone(),
                    self.index.clone(),
                    self.provider.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryIndex;
    use domgate_providers::ScriptedProvider;

    fn settings(ttl_secs: u64, max: usize) -> RetrievalSettings {
        RetrievalSettings {
            ephemeral_ttl: Duration::from_secs(ttl_secs),
            max_ephemeral_sessions: max,
            ..RetrievalSettings::default()
        }
    }

    fn router_with(
        index: Arc<InMemoryIndex>,
        provider: Arc<ScriptedProvider>,
        settings: RetrievalSettings,
    ) -> RetrievalRouter {
        RetrievalRouter::new(TenantId::from("t-1"), index, provider, settings)
    }

    #[test]
    fn collection_names() {
        let router = router_with(
            Arc::new(InMemoryIndex::new()),
            Arc::new(ScriptedProvider::new(Vec::<String>::new())),
            RetrievalSettings::default(),
        );
        assert_eq!(router.durable_collection(), "llm_documents_t_1");
        assert_eq!(
            router.ephemeral_collection(&SessionId::from("s-9")),
            "llm_documents_t_1_ephemeral_s_9"
        );
    }

    #[tokio::test]
    async fn global_query_answers_from_passages() {
        let index = Arc::new(InMemoryIndex::new());
        let provider = Arc::new(ScriptedProvider::new(["The travel budget is 40k."]));
        let router = router_with(index, provider.clone(), RetrievalSettings::default());

        router
            .add(
                &RetrievalScope::Global,
                vec![IndexDocument::new("d1", "Travel budget for 2025 is 40k EUR")],
            )
            .await
            .unwrap();

        let outcome = router.query("travel budget", &RetrievalScope::Global).await.unwrap();
        assert_eq!(outcome, RetrievalOutcome::Answer("The travel budget is 40k.".into()));

        let request = &provider.requests()[0];
        assert!(request.messages[0].content.contains(NO_ANSWER_SENTINEL));
        assert!(request.messages[1].content.contains("40k EUR"));
    }

    #[tokio::test]
    async fn sentinel_reply_is_no_answer() {
        let provider = Arc::new(ScriptedProvider::new([NO_ANSWER_SENTINEL]));
        let router = router_with(Arc::new(InMemoryIndex::new()), provider, RetrievalSettings::default());
        router
            .add(&RetrievalScope::Global, vec![IndexDocument::new("d1", "budget notes")])
            .await
            .unwrap();

        assert!(router.query("budget", &RetrievalScope::Global).await.unwrap().is_no_answer());
    }

    #[tokio::test]
    async fn no_matching_passage_skips_the_model() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let router = router_with(Arc::new(InMemoryIndex::new()), provider.clone(), RetrievalSettings::default());
        router
            .add(&RetrievalScope::Global, vec![IndexDocument::new("d1", "office plants")])
            .await
            .unwrap();

        assert!(router.query("quarterly revenue", &RetrievalScope::Global).await.unwrap().is_no_answer());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn session_scope_never_falls_back_to_global() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let router = router_with(Arc::new(InMemoryIndex::new()), provider.clone(), RetrievalSettings::default());
        router
            .add(&RetrievalScope::Global, vec![IndexDocument::new("d1", "hiring freeze until May")])
            .await
            .unwrap();

        let scope = RetrievalScope::Session(SessionId::from("s1"));
        assert!(router.query("hiring freeze", &scope).await.unwrap().is_no_answer());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn session_documents_stay_in_their_session() {
        let provider = Arc::new(ScriptedProvider::new(["Use vendor B."]));
        let router = router_with(Arc::new(InMemoryIndex::new()), provider.clone(), RetrievalSettings::default());
        let s1 = RetrievalScope::Session(SessionId::from("s1"));
        let s2 = RetrievalScope::Session(SessionId::from("s2"));

        router
            .add(&s1, vec![IndexDocument::new("d1", "vendor comparison: vendor B wins")])
            .await
            .unwrap();
        router
            .add(&s2, vec![IndexDocument::new("d2", "cafeteria menu")])
            .await
            .unwrap();

        assert!(router.query("vendor", &s2).await.unwrap().is_no_answer());
        assert!(router.query("vendor", &RetrievalScope::Global).await.unwrap().is_no_answer());
        assert_eq!(
            router.query("vendor", &s1).await.unwrap(),
            RetrievalOutcome::Answer("Use vendor B.".into())
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn tenants_do_not_share_collections() {
        let index = Arc::new(InMemoryIndex::new());
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let hub = RetrievalHub::new(index, provider.clone(), RetrievalSettings::default());

        hub.for_tenant(&TenantId::from("a"))
            .add(&RetrievalScope::Global, vec![IndexDocument::new("d1", "acquisition target list")])
            .await
            .unwrap();

        let other = hub.for_tenant(&TenantId::from("b"));
        assert!(other.query("acquisition target", &RetrievalScope::Global).await.unwrap().is_no_answer());
        assert_eq!(provider.call_count(), 0);
        assert!(Arc::ptr_eq(&hub.for_tenant(&TenantId::from("b")), &other));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_ephemeral_index_expires() {
        let index = Arc::new(InMemoryIndex::new());
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let router = router_with(index.clone(), provider.clone(), settings(60, 8));
        let scope = RetrievalScope::Session(SessionId::from("s1"));

        router
            .add(&scope, vec![IndexDocument::new("d1", "draft roadmap")])
            .await
            .unwrap();
        assert_eq!(router.ephemeral_session_count().await, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(router.query("roadmap", &scope).await.unwrap().is_no_answer());
        assert_eq!(router.ephemeral_session_count().await, 0);
        assert_eq!(index.collection_count().await, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_session_is_evicted_at_capacity() {
        let index = Arc::new(InMemoryIndex::new());
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let router = router_with(index.clone(), provider, settings(3600, 2));

        for (i, session) in ["s1", "s2"].iter().enumerate() {
            router
                .add(
                    &RetrievalScope::Session(SessionId::from(*session)),
                    vec![IndexDocument::new(format!("d{i}"), "notes")],
                )
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // s1 is refreshed, so s2 becomes the oldest
        router
            .add(&RetrievalScope::Session(SessionId::from("s1")), vec![IndexDocument::new("d9", "more")])
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        router
            .add(&RetrievalScope::Session(SessionId::from("s3")), vec![IndexDocument::new("d3", "notes")])
            .await
            .unwrap();

        assert_eq!(router.ephemeral_session_count().await, 2);
        assert_eq!(index.collection_count().await, 2);
        assert!(
            !router
                .remove(&RetrievalScope::Session(SessionId::from("s2")), "d1")
                .await
                .unwrap()
        );
        assert!(
            router
                .remove(&RetrievalScope::Session(SessionId::from("s1")), "d0")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn provider_failure_is_a_generation_error() {
        let provider = Arc::new(ScriptedProvider::failing(domgate_core::ProviderError::Timeout("slow".into())));
        let router = router_with(Arc::new(InMemoryIndex::new()), provider, RetrievalSettings::default());
        router
            .add(&RetrievalScope::Global, vec![IndexDocument::new("d1", "policy text")])
            .await
            .unwrap();

        let err = router.query("policy", &RetrievalScope::Global).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Generation(_)));
    }
}
