//! Session reset.
//!
//! ```text
//! Active ─▶ Summarizing ─▶ Archiving ─▶ Rotating ─▶ done
//!               │              │            │
//!               └──────────────┴────────────┴─▶ Failed (session untouched)
//! ```
//!
//! The episodic memory row, the deactivation of the old session and the new
//! session are written in one transaction, memory first. If any write fails
//! the transaction rolls back and the old session stays active.

use domgate_core::error::{Error, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::SessionId;
use domgate_core::model::{ChatMessage, ChatSession, EpisodicMemory};
use domgate_store::Database;
use tracing::{info, warn};

use crate::pipeline::Orchestrator;

/// Archive `session_id` into episodic memory and open a fresh session.
///
/// Returns the new active session. The old session's messages are kept.
pub async fn reset_session(
    db: &Database,
    orchestrator: &Orchestrator,
    identity: &AuthenticatedUser,
    session_id: &SessionId,
) -> Result<ChatSession> {
    let tenant = &identity.tenant_id;
    let session = db.scoped::<ChatSession>(tenant).get(session_id.as_str()).await?;
    if !identity.owns(&session.user_id) {
        return Err(Error::authorization("Session belongs to another user"));
    }
    if !session.is_active {
        return Err(Error::validation("session_id", "session has already been reset"));
    }

    let messages = db.scoped::<ChatMessage>(tenant).for_session(session_id).await?;

    info!(session = %session_id, messages = messages.len(), state = "summarizing", "Resetting session");
    let summary = orchestrator
        .summarize(&messages)
        .await
        .map_err(|e| aborted(session_id, e))?;

    let replacement = archive_and_rotate(db, identity, session, summary)
        .await
        .map_err(|e| aborted(session_id, e))?;

    info!(
        session = %session_id,
        new_session = %replacement.id,
        state = "done",
        "Session reset"
    );
    Ok(replacement)
}

async fn archive_and_rotate(
    db: &Database,
    identity: &AuthenticatedUser,
    session: ChatSession,
    summary: String,
) -> Result<ChatSession> {
    let mut uow = db.unit_of_work(&identity.tenant_id).await?;

    info!(session = %session.id, state = "archiving", "Recording episodic memory");
    uow.create(EpisodicMemory::new(identity.user_id.clone(), session.id.clone(), summary))
        .await?;

    info!(session = %session.id, state = "rotating", "Replacing session");
    let title = format!("Reset Session from {}", session.display_title());
    let mut archived = session;
    archived.is_active = false;
    archived.updated_at = chrono::Utc::now();
    uow.update(&archived).await?;

    let replacement = uow
        .create(ChatSession::new(identity.user_id.clone(), Some(title)))
        .await?;

    uow.commit().await?;
    Ok(replacement)
}

fn aborted(session_id: &SessionId, cause: Error) -> Error {
    warn!(session = %session_id, error = %cause, state = "failed", "Session reset aborted");
    Error::ResetAborted {
        session_id: session_id.to_string(),
        reason: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EMPTY_HISTORY_SUMMARY, TurnSettings};
    use domgate_core::error::ProviderError;
    use domgate_core::message::Role;
    use domgate_core::model::{Tenant, User};
    use domgate_providers::ScriptedProvider;
    use domgate_retrieval::{InMemoryIndex, RetrievalRouter, RetrievalSettings};
    use domgate_store::Filter;
    use std::sync::Arc;

    struct Fixture {
        db: Database,
        identity: AuthenticatedUser,
        session: ChatSession,
    }

    async fn fixture(title: Option<&str>, messages: &[(Role, &str)]) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let tenant = db.system::<Tenant>().create(Tenant::new("acme")).await.unwrap();
        let mut user = User::new("ana@acme.test", "x", false);
        user.tenant_id = tenant.id.clone();
        let user = db.system::<User>().create(user).await.unwrap();
        let identity = AuthenticatedUser::from(&user);

        let session = db
            .scoped::<ChatSession>(&tenant.id)
            .create(ChatSession::new(user.id.clone(), title.map(str::to_string)))
            .await
            .unwrap();
        for (role, content) in messages {
            db.scoped::<ChatMessage>(&tenant.id)
                .create(ChatMessage::new(session.id.clone(), *role, *content))
                .await
                .unwrap();
        }
        Fixture { db, identity, session }
    }

    fn orchestrator(provider: ScriptedProvider) -> Orchestrator {
        let provider = Arc::new(provider);
        let router = RetrievalRouter::new(
            domgate_core::ids::TenantId::from("t"),
            Arc::new(InMemoryIndex::new()),
            provider.clone(),
            RetrievalSettings::default(),
        );
        Orchestrator::new(provider, Arc::new(router), TurnSettings::default())
    }

    const TRANSCRIPT: &[(Role, &str)] = &[(Role::User, "What about X?"), (Role::Assistant, "X is fine.")];

    #[tokio::test]
    async fn reset_archives_and_rotates() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::new(["Discussed X"]));

        let fresh = reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap();
        assert!(fresh.is_active);
        assert_eq!(fresh.title.as_deref(), Some("Reset Session from Planning"));
        assert_eq!(fresh.user_id, f.identity.user_id);

        let tenant = &f.identity.tenant_id;
        let old = db_session(&f.db, tenant, &f.session.id).await;
        assert!(!old.is_active);

        let memory = f
            .db
            .scoped::<EpisodicMemory>(tenant)
            .for_session(&f.session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memory.summary, "Discussed X");
        assert!(memory.decisions.is_empty());
        assert!(memory.assumptions.is_empty());
        let memories = f.db.scoped::<EpisodicMemory>(tenant).count(Filter::new()).await.unwrap();
        assert_eq!(memories, 1);
        let sessions = f.db.scoped::<ChatSession>(tenant).count(Filter::new()).await.unwrap();
        assert_eq!(sessions, 2);

        // Old messages are retained.
        let kept = f.db.scoped::<ChatMessage>(tenant).for_session(&f.session.id).await.unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn untitled_session_and_empty_history() {
        let f = fixture(None, &[]).await;
        let orch = orchestrator(ScriptedProvider::new(Vec::<String>::new()));

        let fresh = reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap();
        assert_eq!(fresh.title.as_deref(), Some("Reset Session from Unnamed Session"));

        let memory = f
            .db
            .scoped::<EpisodicMemory>(&f.identity.tenant_id)
            .for_session(&f.session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memory.summary, EMPTY_HISTORY_SUMMARY);
    }

    #[tokio::test]
    async fn memory_write_failure_leaves_session_untouched() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::new(["Discussed X"]));
        sqlx::query("DROP TABLE episodic_memories")
            .execute(f.db.pool())
            .await
            .unwrap();

        let err = reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap_err();
        assert!(matches!(err, Error::ResetAborted { ref session_id, .. } if *session_id == f.session.id.to_string()));

        let tenant = &f.identity.tenant_id;
        assert!(db_session(&f.db, tenant, &f.session.id).await.is_active);
        let sessions = f.db.scoped::<ChatSession>(tenant).count(Filter::new()).await.unwrap();
        assert_eq!(sessions, 1);
        let messages = f.db.scoped::<ChatMessage>(tenant).for_session(&f.session.id).await.unwrap();
        assert_eq!(messages.len(), TRANSCRIPT.len());
    }

    #[tokio::test]
    async fn summarize_failure_aborts_before_any_write() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::failing(ProviderError::Timeout("30s".into())));

        let err = reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap_err();
        assert!(matches!(err, Error::ResetAborted { .. }));

        let tenant = &f.identity.tenant_id;
        assert!(db_session(&f.db, tenant, &f.session.id).await.is_active);
        let memories = f.db.scoped::<EpisodicMemory>(tenant).count(Filter::new()).await.unwrap();
        assert_eq!(memories, 0);
    }

    #[tokio::test]
    async fn other_users_session_is_forbidden() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::new(["Discussed X"]));
        let mut intruder = f.identity.clone();
        intruder.user_id = domgate_core::ids::UserId::new();

        let err = reset_session(&f.db, &orch, &intruder, &f.session.id).await.unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
    }

    #[tokio::test]
    async fn unknown_or_foreign_tenant_session_is_not_found() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::new(["Discussed X"]));

        let err = reset_session(&f.db, &orch, &f.identity, &SessionId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let mut other_tenant = f.identity.clone();
        other_tenant.tenant_id = domgate_core::ids::TenantId::new();
        let err = reset_session(&f.db, &orch, &other_tenant, &f.session.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn archived_session_cannot_be_reset_again() {
        let f = fixture(Some("Planning"), TRANSCRIPT).await;
        let orch = orchestrator(ScriptedProvider::new(["Discussed X", "Again"]));

        reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap();
        let err = reset_session(&f.db, &orch, &f.identity, &f.session.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    async fn db_session(db: &Database, tenant: &domgate_core::ids::TenantId, id: &SessionId) -> ChatSession {
        db.scoped::<ChatSession>(tenant).get(id.as_str()).await.unwrap()
    }
}
