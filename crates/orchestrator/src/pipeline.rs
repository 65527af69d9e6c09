//! The per-turn pipeline.
//!
//! ```text
//! user text ─▶ [research mode?] ─▶ RetrievalRouter (session scope)
//!                   │                   │
//!                   │          answer ──┴── no answer ─▶ warning fragment
//!                   ▼                   ▼
//!             model stream (collected, never forwarded)
//!                   │
//!                   ▼
//!              compose() ─▶ Decision / Why / Next 3 Actions fragments
//! ```
//!
//! [`Orchestrator::process_turn`] is lazy: nothing runs until the returned
//! stream is polled, and every call starts the whole pipeline over.

use std::collections::VecDeque;
use std::sync::Arc;

use domgate_config::AppConfig;
use domgate_core::error::Result;
use domgate_core::ids::SessionId;
use domgate_core::message::Message;
use domgate_core::model::ChatMessage;
use domgate_core::provider::{Provider, ProviderRequest};
use domgate_core::retrieval::{RetrievalOutcome, RetrievalScope};
use domgate_retrieval::RetrievalRouter;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, warn};

use crate::composer::{TokenCollector, compose};
use crate::fragment::TurnFragment;

/// Summary recorded for a session that never had a message.
pub const EMPTY_HISTORY_SUMMARY: &str = "No chat history to summarize.";

const ANSWER_FORMAT_PROMPT: &str = "Structure your answer as exactly three sections, in this order:\n\
Decision: the recommended decision\n\
Why: the reasoning behind it\n\
Next 3 Actions: three concrete next steps";

/// The stream returned by [`Orchestrator::process_turn`].
pub type FragmentStream = BoxStream<'static, Result<TurnFragment>>;

/// Model parameters for turns and summaries.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl TurnSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Runs turns and summaries for one tenant.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    retrieval: Arc<RetrievalRouter>,
    settings: Arc<TurnSettings>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, retrieval: Arc<RetrievalRouter>, settings: TurnSettings) -> Self {
        Self {
            provider,
            retrieval,
            settings: Arc::new(settings),
        }
    }

    pub fn retrieval(&self) -> &Arc<RetrievalRouter> {
        &self.retrieval
    }

    /// Answer one user turn as a finite stream of fragments.
    ///
    /// In research mode the session's ephemeral index is consulted first;
    /// when it has nothing relevant a single warning fragment is emitted and
    /// the turn proceeds with the bare question. The model's output is then
    /// collected in full and emitted as its non-empty composed sections.
    pub fn process_turn(
        &self,
        user_text: impl Into<String>,
        session_id: SessionId,
        research_mode: bool,
    ) -> FragmentStream {
        let turn = Turn {
            orchestrator: self.clone(),
            user_text: user_text.into(),
            session_id,
            research_mode,
            stage: Stage::Retrieve,
        };
        stream::unfold(turn, Turn::advance).boxed()
    }

    /// Summarize a transcript. The model's reply is returned as-is apart
    /// from surrounding whitespace; it is not passed through the composer.
    pub async fn summarize(&self, messages: &[ChatMessage]) -> Result<String> {
        if messages.is_empty() {
            return Ok(EMPTY_HISTORY_SUMMARY.into());
        }

        let history = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Summarize the following chat history.\n\n{history}\n\nSummary:");

        let summary = self.collect(self.request(vec![Message::user(prompt)])).await?;
        debug!(messages = messages.len(), chars = summary.len(), "Transcript summarized");
        Ok(summary.trim().to_string())
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        self.collect(self.request(vec![
            Message::system(ANSWER_FORMAT_PROMPT),
            Message::user(prompt),
        ]))
        .await
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.settings.model.clone(), messages);
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;
        request.stream = true;
        request
    }

    /// Drain the backend stream until its `done` chunk or channel close.
    async fn collect(&self, request: ProviderRequest) -> Result<String> {
        let mut rx = self.provider.stream(request).await?;
        let mut collector = TokenCollector::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content.as_deref() {
                collector.pass(content);
            }
            if chunk.done {
                break;
            }
        }
        Ok(collector.into_text())
    }
}

fn augmented_prompt(question: &str, context: &str) -> String {
    format!(
        "User question: {question}\n\nRelated information: {context}\n\n\
         Answer the question using this information."
    )
}

// ── Turn state machine ─────────────────────────────────────────────────

enum Stage {
    Retrieve,
    Generate { prompt: String },
    Emit(VecDeque<TurnFragment>),
    Finished,
}

struct Turn {
    orchestrator: Orchestrator,
    user_text: String,
    session_id: SessionId,
    research_mode: bool,
    stage: Stage,
}

impl Turn {
    /// Run until the next fragment is ready. After an error the turn is
    /// finished and the stream ends.
    async fn advance(mut self) -> Option<(Result<TurnFragment>, Self)> {
        loop {
            match std::mem::replace(&mut self.stage, Stage::Finished) {
                Stage::Retrieve if !self.research_mode => {
                    self.stage = Stage::Generate {
                        prompt: self.user_text.clone(),
                    };
                }
                Stage::Retrieve => {
                    let scope = RetrievalScope::Session(self.session_id.clone());
                    match self.orchestrator.retrieval.query(&self.user_text, &scope).await {
                        Ok(RetrievalOutcome::Answer(context)) => {
                            debug!(session = %self.session_id, "Research context found");
                            self.stage = Stage::Generate {
                                prompt: augmented_prompt(&self.user_text, &context),
                            };
                        }
                        Ok(RetrievalOutcome::NoAnswer) => {
                            info!(session = %self.session_id, "No research context, answering without it");
                            self.stage = Stage::Generate {
                                prompt: self.user_text.clone(),
                            };
                            return Some((Ok(TurnFragment::no_context_warning()), self));
                        }
                        Err(e) => {
                            warn!(session = %self.session_id, error = %e, "Research lookup failed");
                            return Some((Err(e.into()), self));
                        }
                    }
                }
                Stage::Generate { prompt } => match self.orchestrator.generate(prompt).await {
                    Ok(raw) => {
                        let fragments = TurnFragment::from_answer(compose(&raw));
                        debug!(session = %self.session_id, sections = fragments.len(), "Answer composed");
                        self.stage = Stage::Emit(fragments.into());
                    }
                    Err(e) => {
                        warn!(session = %self.session_id, error = %e, "Model call failed");
                        return Some((Err(e), self));
                    }
                },
                Stage::Emit(mut pending) => {
                    let fragment = pending.pop_front()?;
                    self.stage = Stage::Emit(pending);
                    return Some((Ok(fragment), self));
                }
                Stage::Finished => return None,
            }
        }
    }
}
