//! HTTP API gateway for the DOM chat service.
//!
//! Exposes the `/v1` REST surface (chat sessions, streaming turns, session
//! reset, knowledge upload, long-term memory, feedback and user settings)
//! behind tenant-aware authentication, plus an unauthenticated health check.
//!
//! Built on Axum.

pub mod api_v1;
pub mod auth;
pub mod error;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use domgate_config::AppConfig;
use domgate_core::error::Error;
use domgate_core::provider::Provider;
use domgate_core::retrieval::RetrievalIndex;
use domgate_orchestrator::{
    ChatService, FeedbackService, KnowledgeIngestor, MemoryService, SettingsService, TurnSettings,
    UploadPolicy,
};
use domgate_retrieval::{RetrievalHub, RetrievalSettings};
use domgate_security::{HttpFetcher, IdentityVerifier, JsonFetcher};
use domgate_store::Database;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use error::ApiError;

/// Shared application state for the gateway.
pub struct AppState {
    pub config: AppConfig,
    pub verifier: IdentityVerifier,
    pub chat: ChatService,
    pub memory: MemoryService,
    pub knowledge: KnowledgeIngestor,
    pub feedback: FeedbackService,
    pub settings: SettingsService,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the services from already-opened backends.
    pub fn new(
        config: AppConfig,
        db: Database,
        provider: Arc<dyn Provider>,
        index: Arc<dyn RetrievalIndex>,
        fetcher: Arc<dyn JsonFetcher>,
    ) -> domgate_core::error::Result<Self> {
        let verifier = IdentityVerifier::new(&config, db.clone(), fetcher)?;
        let retrieval = Arc::new(RetrievalHub::new(
            index,
            provider.clone(),
            RetrievalSettings::from_config(&config),
        ));

        Ok(Self {
            chat: ChatService::new(db.clone(), provider, retrieval.clone(), TurnSettings::from_config(&config)),
            memory: MemoryService::new(db.clone()),
            feedback: FeedbackService::new(db.clone()),
            settings: SettingsService::new(db.clone()),
            knowledge: KnowledgeIngestor::new(db, retrieval, UploadPolicy::from_config(&config)),
            verifier,
            config,
        })
    }
}

/// Build the full router.
///
/// Layers applied:
/// - Identity middleware on every `/v1` route except the login flow
/// - CORS limited to the configured origins
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);
    let body_limit = state.config.gateway.max_body_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let db = Database::connect(&config.database.url, config.database.max_connections).await?;
    let index = domgate_retrieval::open_index(&config.retrieval.backend, db.pool().clone()).await?;
    let provider = domgate_providers::build_from_config(&config)
        .default()
        .ok_or_else(|| Error::Config {
            message: format!("provider '{}' has no api_url and no known endpoint", config.default_provider),
        })?;
    let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(10)));

    let state = Arc::new(AppState::new(config, db, provider, index, fetcher)?);
    info!(mode = ?state.verifier.mode(), "Identity verification ready");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
