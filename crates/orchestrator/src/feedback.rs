//! Ratings and comments on assistant replies.

use domgate_core::error::{Error, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{MessageId, SessionId};
use domgate_core::model::{ChatMessage, ChatSession, Feedback};
use domgate_store::{Database, Store};
use serde::Deserialize;
use tracing::info;

/// A rating submitted by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    pub rating: i8,
    #[serde(default)]
    pub comment: Option<String>,
}

pub struct FeedbackService {
    db: Database,
}

impl FeedbackService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a rating. A referenced session or message must be one of the
    /// caller's own; a message also fixes the session it belongs to.
    pub async fn submit(&self, identity: &AuthenticatedUser, input: NewFeedback) -> Result<Feedback> {
        if !(Feedback::MIN_RATING..=Feedback::MAX_RATING).contains(&input.rating) {
            return Err(Error::validation("rating", "must be -1, 0 or 1"));
        }
        let comment = input.comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > Feedback::MAX_COMMENT_CHARS)
        {
            return Err(Error::validation(
                "comment",
                format!("must be at most {} characters", Feedback::MAX_COMMENT_CHARS),
            ));
        }

        let mut session_id = input.session_id;
        if let Some(message_id) = &input.message_id {
            let message = self.messages(identity).get(message_id.as_str()).await?;
            match &session_id {
                Some(session) if *session != message.session_id => {
                    return Err(Error::validation("message_id", "message is not part of the given session"));
                }
                _ => session_id = Some(message.session_id),
            }
        }
        if let Some(session) = &session_id {
            let session = self.sessions(identity).get(session.as_str()).await?;
            if !identity.owns(&session.user_id) {
                return Err(Error::authorization("Session belongs to another user"));
            }
        }

        let mut feedback = Feedback::new(identity.user_id.clone(), input.rating);
        feedback.session_id = session_id;
        feedback.message_id = input.message_id;
        feedback.comment = comment;
        let feedback = self.feedback(identity).create(feedback).await?;
        info!(feedback = %feedback.id, rating = feedback.rating, "Feedback recorded");
        Ok(feedback)
    }

    /// The caller's ratings within a session. Empty for sessions the caller
    /// never rated, including other users' sessions.
    pub async fn for_session(&self, identity: &AuthenticatedUser, session_id: &SessionId) -> Result<Vec<Feedback>> {
        Ok(self.feedback(identity).for_session(session_id, &identity.user_id).await?)
    }

    pub async fn for_message(&self, identity: &AuthenticatedUser, message_id: &MessageId) -> Result<Option<Feedback>> {
        Ok(self.feedback(identity).for_message(message_id, &identity.user_id).await?)
    }

    fn feedback(&self, identity: &AuthenticatedUser) -> Store<Feedback> {
        self.db.scoped(&identity.tenant_id)
    }

    fn sessions(&self, identity: &AuthenticatedUser) -> Store<ChatSession> {
        self.db.scoped(&identity.tenant_id)
    }

    fn messages(&self, identity: &AuthenticatedUser) -> Store<ChatMessage> {
        self.db.scoped(&identity.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domgate_core::message::Role;
    use domgate_core::model::{Tenant, User};

    struct Fixture {
        service: FeedbackService,
        ana: AuthenticatedUser,
        bo: AuthenticatedUser,
        session: ChatSession,
        reply: ChatMessage,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let tenant = db.system::<Tenant>().create(Tenant::new("acme")).await.unwrap();
        let mut people = Vec::new();
        for email in ["ana@acme.test", "bo@acme.test"] {
            let mut user = User::new(email, "x", false);
            user.tenant_id = tenant.id.clone();
            let user = db.system::<User>().create(user).await.unwrap();
            people.push(AuthenticatedUser::from(&user));
        }
        let bo = people.pop().unwrap();
        let ana = people.pop().unwrap();

        let session = db
            .scoped::<ChatSession>(&tenant.id)
            .create(ChatSession::new(ana.user_id.clone(), None))
            .await
            .unwrap();
        let reply = db
            .scoped::<ChatMessage>(&tenant.id)
            .create(ChatMessage::new(session.id.clone(), Role::Assistant, "Pick vendor B."))
            .await
            .unwrap();

        Fixture {
            service: FeedbackService::new(db),
            ana,
            bo,
            session,
            reply,
        }
    }

    fn rating(value: i8) -> NewFeedback {
        NewFeedback {
            session_id: None,
            message_id: None,
            rating: value,
            comment: None,
        }
    }

    #[tokio::test]
    async fn rating_a_message_links_its_session() {
        let f = fixture().await;
        let stored = f
            .service
            .submit(
                &f.ana,
                NewFeedback {
                    message_id: Some(f.reply.id.clone()),
                    comment: Some("  very clear  ".into()),
                    ..rating(1)
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.session_id.as_ref(), Some(&f.session.id));
        assert_eq!(stored.comment.as_deref(), Some("very clear"));

        let listed = f.service.for_session(&f.ana, &f.session.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        let found = f.service.for_message(&f.ana, &f.reply.id).await.unwrap().unwrap();
        assert_eq!(found.id, stored.id);

        // Another user sees none of it.
        assert!(f.service.for_session(&f.bo, &f.session.id).await.unwrap().is_empty());
        assert!(f.service.for_message(&f.bo, &f.reply.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn out_of_range_rating_and_long_comment_are_rejected() {
        let f = fixture().await;
        for value in [-2, 2] {
            let err = f.service.submit(&f.ana, rating(value)).await.unwrap_err();
            assert!(matches!(err, Error::Validation { ref field, .. } if field == "rating"));
        }

        let err = f
            .service
            .submit(
                &f.ana,
                NewFeedback {
                    comment: Some("x".repeat(Feedback::MAX_COMMENT_CHARS + 1)),
                    ..rating(0)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "comment"));
    }

    #[tokio::test]
    async fn foreign_or_mismatched_targets_are_refused() {
        let f = fixture().await;

        let err = f
            .service
            .submit(
                &f.bo,
                NewFeedback {
                    session_id: Some(f.session.id.clone()),
                    ..rating(-1)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));

        let err = f
            .service
            .submit(
                &f.ana,
                NewFeedback {
                    session_id: Some(SessionId::new()),
                    message_id: Some(f.reply.id.clone()),
                    ..rating(1)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "message_id"));

        let err = f
            .service
            .submit(
                &f.ana,
                NewFeedback {
                    message_id: Some(MessageId::new()),
                    ..rating(1)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn unattached_rating_is_allowed() {
        let f = fixture().await;
        let stored = f.service.submit(&f.ana, rating(0)).await.unwrap();
        assert!(stored.session_id.is_none());
        assert!(stored.message_id.is_none());
    }
}
