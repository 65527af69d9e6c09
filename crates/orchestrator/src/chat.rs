//! Chat service: sessions, transcripts and streamed replies.
//!
//! Every operation runs as an [`AuthenticatedUser`] and only touches that
//! user's sessions inside that user's tenant.

use std::sync::Arc;

use domgate_core::error::{Error, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{SessionId, TenantId};
use domgate_core::message::Role;
use domgate_core::model::{ChatMessage, ChatSession};
use domgate_core::provider::Provider;
use domgate_retrieval::RetrievalHub;
use domgate_store::{Database, Store};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::composer::ComposedAnswer;
use crate::fragment::TurnFragment;
use crate::lifecycle::reset_session;
use crate::pipeline::{FragmentStream, Orchestrator, TurnSettings};

pub struct ChatService {
    db: Database,
    provider: Arc<dyn Provider>,
    retrieval: Arc<RetrievalHub>,
    settings: TurnSettings,
}

impl ChatService {
    pub fn new(db: Database, provider: Arc<dyn Provider>, retrieval: Arc<RetrievalHub>, settings: TurnSettings) -> Self {
        Self {
            db,
            provider,
            retrieval,
            settings,
        }
    }

    /// The orchestrator bound to `tenant`'s retrieval router.
    pub fn orchestrator(&self, tenant: &TenantId) -> Orchestrator {
        Orchestrator::new(
            self.provider.clone(),
            self.retrieval.for_tenant(tenant),
            self.settings.clone(),
        )
    }

    pub async fn create_session(&self, identity: &AuthenticatedUser, title: Option<String>) -> Result<ChatSession> {
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let session = self
            .sessions(identity)
            .create(ChatSession::new(identity.user_id.clone(), title))
            .await?;
        info!(session = %session.id, tenant = %identity.tenant_id, "Chat session created");
        Ok(session)
    }

    /// All of the caller's sessions, newest first.
    pub async fn list_sessions(&self, identity: &AuthenticatedUser) -> Result<Vec<ChatSession>> {
        Ok(self.sessions(identity).for_user(&identity.user_id).await?)
    }

    /// Append a user message to an active session.
    pub async fn send_message(
        &self,
        identity: &AuthenticatedUser,
        session_id: &SessionId,
        content: &str,
    ) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(Error::validation("content", "message must not be blank"));
        }
        let session = self.owned_session(identity, session_id).await?;
        ensure_active(&session)?;

        let message = self
            .transcript(identity)
            .create(ChatMessage::new(session_id.clone(), Role::User, content))
            .await?;
        debug!(session = %session_id, message = %message.id, "User message stored");
        Ok(message)
    }

    /// Answer the latest message of a session.
    ///
    /// The returned stream forwards the turn's fragments. Once the turn has
    /// completed without error, the rendered fragments are stored as one
    /// assistant message; a storage failure surfaces as a final error item.
    pub async fn stream_reply(
        &self,
        identity: &AuthenticatedUser,
        session_id: &SessionId,
        research_mode: bool,
    ) -> Result<FragmentStream> {
        let session = self.owned_session(identity, session_id).await?;
        ensure_active(&session)?;

        let transcript = self.transcript(identity);
        let prompt = transcript
            .for_session(session_id)
            .await?
            .pop()
            .ok_or_else(|| Error::validation("session_id", "session has no messages to answer"))?;

        let turn = self
            .orchestrator(&identity.tenant_id)
            .process_turn(prompt.content, session_id.clone(), research_mode);

        let reply = Reply {
            turn,
            transcript,
            session_id: session_id.clone(),
            fragments: Vec::new(),
            failed: false,
            finished: false,
        };
        Ok(stream::unfold(reply, Reply::advance).boxed())
    }

    /// The ordered transcript of one of the caller's sessions, archived or not.
    pub async fn messages(&self, identity: &AuthenticatedUser, session_id: &SessionId) -> Result<Vec<ChatMessage>> {
        self.owned_session(identity, session_id).await?;
        Ok(self.transcript(identity).for_session(session_id).await?)
    }

    pub async fn reset(&self, identity: &AuthenticatedUser, session_id: &SessionId) -> Result<ChatSession> {
        let orchestrator = self.orchestrator(&identity.tenant_id);
        reset_session(&self.db, &orchestrator, identity, session_id).await
    }

    async fn owned_session(&self, identity: &AuthenticatedUser, session_id: &SessionId) -> Result<ChatSession> {
        let session = self.sessions(identity).get(session_id.as_str()).await?;
        if !identity.owns(&session.user_id) {
            return Err(Error::authorization("Session belongs to another user"));
        }
        Ok(session)
    }

    fn sessions(&self, identity: &AuthenticatedUser) -> Store<ChatSession> {
        self.db.scoped(&identity.tenant_id)
    }

    fn transcript(&self, identity: &AuthenticatedUser) -> Store<ChatMessage> {
        self.db.scoped(&identity.tenant_id)
    }
}

fn ensure_active(session: &ChatSession) -> Result<()> {
    if session.is_active {
        Ok(())
    } else {
        Err(Error::validation("session_id", "session has been reset and is read-only"))
    }
}

/// Forwards a turn and records its output when the turn is exhausted.
struct Reply {
    turn: FragmentStream,
    transcript: Store<ChatMessage>,
    session_id: SessionId,
    fragments: Vec<TurnFragment>,
    failed: bool,
    finished: bool,
}

impl Reply {
    async fn advance(mut self) -> Option<(Result<TurnFragment>, Self)> {
        if self.finished {
            return None;
        }
        match self.turn.next().await {
            Some(Ok(fragment)) => {
                self.fragments.push(fragment.clone());
                Some((Ok(fragment), self))
            }
            Some(Err(e)) => {
                self.failed = true;
                Some((Err(e), self))
            }
            None => {
                self.finished = true;
                if self.failed || self.fragments.is_empty() {
                    debug!(session = %self.session_id, failed = self.failed, "Nothing to record for turn");
                    return None;
                }
                match record(&self.transcript, &self.session_id, &self.fragments).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(session = %self.session_id, error = %e, "Failed to store assistant reply");
                        Some((Err(e), self))
                    }
                }
            }
        }
    }
}

async fn record(transcript: &Store<ChatMessage>, session_id: &SessionId, fragments: &[TurnFragment]) -> Result<()> {
    let content: String = fragments.iter().map(TurnFragment::render).collect();
    let mut answer = ComposedAnswer::default();
    for fragment in fragments {
        match fragment {
            TurnFragment::Decision { content } => answer.decision = content.clone(),
            TurnFragment::Why { content } => answer.why = content.clone(),
            TurnFragment::NextActions { content } => answer.next_actions = content.clone(),
            TurnFragment::Warning { .. } => {}
        }
    }

    let message = ChatMessage::new(session_id.clone(), Role::Assistant, content)
        .with_raw_response(serde_json::to_value(&answer)?);
    transcript.create(message).await?;
    debug!(session = %session_id, "Assistant reply stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domgate_core::error::ProviderError;
    use domgate_core::model::{Tenant, User};
    use domgate_providers::ScriptedProvider;
    use domgate_retrieval::{InMemoryIndex, RetrievalSettings};

    const ANSWER: &str = "Decision: Ship v1. Why: Users asked. Next 3 Actions: Test, Deploy, Announce.";

    async fn setup(provider: Arc<ScriptedProvider>) -> (ChatService, AuthenticatedUser) {
        let db = Database::in_memory().await.unwrap();
        let tenant = db.system::<Tenant>().create(Tenant::new("acme")).await.unwrap();
        let mut user = User::new("ana@acme.test", "x", false);
        user.tenant_id = tenant.id.clone();
        let user = db.system::<User>().create(user).await.unwrap();

        let hub = RetrievalHub::new(
            Arc::new(InMemoryIndex::new()),
            provider.clone(),
            RetrievalSettings::default(),
        );
        let service = ChatService::new(db, provider, Arc::new(hub), TurnSettings::default());
        (service, AuthenticatedUser::from(&user))
    }

    #[tokio::test]
    async fn reply_is_streamed_then_recorded() {
        let provider = Arc::new(ScriptedProvider::new([ANSWER]));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, Some("Launch".into())).await.unwrap();
        chat.send_message(&ana, &session.id, "Should we ship?").await.unwrap();

        let stream = chat.stream_reply(&ana, &session.id, false).await.unwrap();
        let fragments: Vec<TurnFragment> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments.len(), 3);

        let transcript = chat.messages(&ana, &session.id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        let reply = &transcript[1];
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(
            reply.content,
            "**Decision**\nShip v1.\n\n**Why**\nUsers asked.\n\n**Next 3 Actions**\nTest, Deploy, Announce.\n\n"
        );
        let raw = reply.raw_response.as_ref().unwrap();
        assert_eq!(raw["Decision"], "Ship v1.");
    }

    #[tokio::test]
    async fn research_warning_is_recorded_with_the_answer() {
        let provider = Arc::new(ScriptedProvider::new([ANSWER]));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, None).await.unwrap();
        chat.send_message(&ana, &session.id, "Should we ship?").await.unwrap();

        let stream = chat.stream_reply(&ana, &session.id, true).await.unwrap();
        let fragments: Vec<TurnFragment> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments[0], TurnFragment::no_context_warning());

        let transcript = chat.messages(&ana, &session.id).await.unwrap();
        assert!(transcript[1].content.starts_with("**Warning**: No relevant information"));
    }

    #[tokio::test]
    async fn failed_turn_is_not_recorded() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::Network("down".into())));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, None).await.unwrap();
        chat.send_message(&ana, &session.id, "Hello").await.unwrap();

        let results: Vec<Result<TurnFragment>> =
            chat.stream_reply(&ana, &session.id, false).await.unwrap().collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(chat.messages(&ana, &session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reply_requires_a_message() {
        let provider = Arc::new(ScriptedProvider::new([ANSWER]));
        let (chat, ana) = setup(provider.clone()).await;
        let session = chat.create_session(&ana, None).await.unwrap();

        let err = chat.stream_reply(&ana, &session.id, false).await.err().unwrap();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let provider = Arc::new(ScriptedProvider::new([ANSWER]));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, None).await.unwrap();

        let err = chat.send_message(&ana, &session.id, "   ").await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "content"));
    }

    #[tokio::test]
    async fn sessions_are_private_to_their_owner() {
        let provider = Arc::new(ScriptedProvider::new([ANSWER]));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, None).await.unwrap();

        let mut bo = ana.clone();
        bo.user_id = domgate_core::ids::UserId::new();
        bo.email = "bo@acme.test".into();

        let err = chat.send_message(&bo, &session.id, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
        let err = chat.messages(&bo, &session.id).await.unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
        assert!(chat.list_sessions(&bo).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_session_becomes_read_only() {
        let provider = Arc::new(ScriptedProvider::new(["Discussed shipping"]));
        let (chat, ana) = setup(provider).await;
        let session = chat.create_session(&ana, Some("Launch".into())).await.unwrap();
        chat.send_message(&ana, &session.id, "Should we ship?").await.unwrap();

        let fresh = chat.reset(&ana, &session.id).await.unwrap();
        assert_eq!(fresh.title.as_deref(), Some("Reset Session from Launch"));

        let err = chat.send_message(&ana, &session.id, "more").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        // The archived transcript stays readable.
        assert_eq!(chat.messages(&ana, &session.id).await.unwrap().len(), 1);

        let sessions = chat.list_sessions(&ana).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s.is_active).count(), 1);
    }
}
