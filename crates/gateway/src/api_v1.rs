//! REST API v1: chat sessions, streaming turns, knowledge, memory, feedback
//! and user settings.
//!
//! All routes are nested under `/v1`. Handlers receive the caller as an
//! [`AuthenticatedUser`] extension placed there by
//! [`crate::auth::require_identity`].

use std::convert::Infallible;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, Sse},
    },
    routing::{get, patch, post},
};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{MemoryId, MessageId, SessionId};
use domgate_core::model::{
    ChatMessage, ChatSession, EpisodicMemory, Feedback, KnowledgeDocument, StructuredMemory, UserSettings,
};
use domgate_orchestrator::{MemoryScope, NewFeedback, SettingsUpdate, Upload};
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use tracing::warn;

use crate::SharedState;
use crate::auth;
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Build the v1 API router.
pub fn v1_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        // Chat
        .route("/chat/sessions", get(list_sessions).post(create_session))
        .route("/chat/sessions/{id}/messages", get(session_messages))
        .route("/chat/send", post(send_message))
        .route("/chat/stream/{id}", get(stream_reply))
        .route("/chat/reset/{id}", post(reset_session))
        // Knowledge
        .route("/files/upload", post(upload_file))
        .route("/admin/knowledge", get(search_knowledge))
        // Memory
        .route("/memory/structured", get(get_structured).post(create_structured))
        .route("/memory/structured/{id}", patch(update_structured).delete(delete_structured))
        .route("/memory/episodic", get(list_episodic))
        // Feedback
        .route("/feedback", post(submit_feedback))
        .route("/feedback/{session_id}", get(session_feedback))
        .route("/feedback/message/{id}", get(message_feedback))
        // Preferences
        .route("/user/settings", get(get_settings).post(update_settings))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_identity));

    Router::new()
        .route("/auth/dev/login", get(auth::dev_login_handler))
        .route("/auth/dev/callback", get(auth::dev_callback_handler))
        .merge(protected)
        .with_state(state)
}

// ── Chat ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

async fn create_session(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let Json(body) = body.unwrap_or_default();
    let session = state.chat.create_session(&identity, body.title).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<ChatSession>>> {
    Ok(Json(state.chat.list_sessions(&identity).await?))
}

async fn session_messages(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.chat.messages(&identity, &SessionId::from(id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: SessionId,
    pub content: String,
}

async fn send_message(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .chat
        .send_message(&identity, &body.session_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub research_mode: bool,
}

/// Answer the session's latest message as a server-sent event stream.
///
/// Each fragment becomes one event named after its kind. A failure mid-turn
/// is reported as an `error` event; the stream always closes with `done`.
async fn stream_reply(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let session_id = SessionId::from(id);
    let fragments = state
        .chat
        .stream_reply(&identity, &session_id, params.research_mode)
        .await?;

    let events = fragments
        .map(move |item| {
            let event = match item {
                Ok(fragment) => SseEvent::default()
                    .event(fragment.event_type())
                    .data(serde_json::to_string(&fragment).unwrap_or_default()),
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Turn failed mid-stream");
                    SseEvent::default()
                        .event("error")
                        .data(serde_json::json!({ "error": e.to_string() }).to_string())
                }
            };
            Ok(event)
        })
        .chain(stream::once(async { Ok(SseEvent::default().event("done").data("{}")) }));

    Ok(Sse::new(events))
}

async fn reset_session(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(state.chat.reset(&identity, &SessionId::from(id)).await?))
}

// ── Knowledge ───────────────────────────────────────────────────────────

async fn upload_file(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Json(upload): Json<Upload>,
) -> ApiResult<(StatusCode, Json<KnowledgeDocument>)> {
    let document = state.knowledge.ingest(&identity, upload).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeQuery {
    pub file_name: Option<String>,
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

async fn search_knowledge(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Query(query): Query<KnowledgeQuery>,
) -> ApiResult<Json<Vec<KnowledgeDocument>>> {
    let documents = state
        .knowledge
        .search(&identity, query.file_name.as_deref(), query.skip, query.limit)
        .await?;
    Ok(Json(documents))
}

// ── Memory ──────────────────────────────────────────────────────────────

fn scope(personal: bool) -> MemoryScope {
    if personal { MemoryScope::Personal } else { MemoryScope::Tenant }
}

#[derive(Debug, Deserialize)]
pub struct CreateStructuredRequest {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub personal: bool,
}

async fn create_structured(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Json(body): Json<CreateStructuredRequest>,
) -> ApiResult<(StatusCode, Json<StructuredMemory>)> {
    let memory = state
        .memory
        .create_structured(&identity, &body.key, body.value, body.description, scope(body.personal))
        .await?;
    Ok((StatusCode::CREATED, Json(memory)))
}

#[derive(Debug, Deserialize)]
pub struct StructuredQuery {
    pub key: String,
    #[serde(default)]
    pub personal: bool,
}

async fn get_structured(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Query(query): Query<StructuredQuery>,
) -> ApiResult<Json<StructuredMemory>> {
    let memory = state
        .memory
        .structured_by_key(&identity, &query.key, scope(query.personal))
        .await?;
    Ok(Json(memory))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStructuredRequest {
    pub value: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

async fn update_structured(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStructuredRequest>,
) -> ApiResult<Json<StructuredMemory>> {
    let memory = state
        .memory
        .update_structured(&identity, &MemoryId::from(id), body.value, body.description)
        .await?;
    Ok(Json(memory))
}

async fn delete_structured(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.memory.delete_structured(&identity, &MemoryId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EpisodicQuery {
    pub session_id: Option<SessionId>,
}

/// The caller's session summaries, or the one for `session_id`.
async fn list_episodic(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Query(query): Query<EpisodicQuery>,
) -> ApiResult<Json<Vec<EpisodicMemory>>> {
    let memories = match query.session_id {
        Some(session_id) => state
            .memory
            .episodic_for_session(&identity, &session_id)
            .await?
            .into_iter()
            .collect(),
        None => state.memory.episodic_for_user(&identity).await?,
    };
    Ok(Json(memories))
}

// ── Feedback ────────────────────────────────────────────────────────────

async fn submit_feedback(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Json(body): Json<NewFeedback>,
) -> ApiResult<(StatusCode, Json<Feedback>)> {
    let feedback = state.feedback.submit(&identity, body).await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

async fn session_feedback(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Feedback>>> {
    Ok(Json(state.feedback.for_session(&identity, &SessionId::from(session_id)).await?))
}

/// `null` when the caller never rated the message.
async fn message_feedback(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Option<Feedback>>> {
    Ok(Json(state.feedback.for_message(&identity, &MessageId::from(id)).await?))
}

// ── Settings ────────────────────────────────────────────────────────────

async fn get_settings(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
) -> ApiResult<Json<UserSettings>> {
    Ok(Json(state.settings.get(&identity).await?))
}

async fn update_settings(
    State(state): State<SharedState>,
    Extension(identity): Extension<AuthenticatedUser>,
    Json(body): Json<SettingsUpdate>,
) -> ApiResult<Json<UserSettings>> {
    Ok(Json(state.settings.update(&identity, body).await?))
}
