//! Configuration loading, validation, and management for the DOM gateway.
//!
//! Loads configuration from `~/.domgate/config.toml` with environment
//! variable overrides. Validates all settings at startup; the resulting
//! snapshot is immutable and handed to constructors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Minimum length of the HMAC secret for local session tokens.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// The placeholder secret shipped in sample configs. Never accepted.
pub const PLACEHOLDER_SESSION_SECRET: &str = "change-me-session-secret";

/// The root configuration structure.
///
/// Maps directly to `~/.domgate/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name of the single tenant federated identities are provisioned into
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub uploads: UploadConfig,
}

fn default_project_name() -> String {
    "DOM Enterprise Gateway".into()
}
fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("project_name", &self.project_name)
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("database", &self.database)
            .field("gateway", &self.gateway)
            .field("auth", &self.auth)
            .field("retrieval", &self.retrieval)
            .field("uploads", &self.uploads)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

// ── Database ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://domgate.db` or `sqlite::memory:`
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://domgate.db".into()
}
fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS. Empty = same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Request body limit in bytes (uploads carry extracted text).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: vec![],
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────

/// Which identity mode a deployment runs in. The two are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Federated,
    LocalSession,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub oidc: OidcConfig,

    /// Federated users with this email are provisioned as administrators
    #[serde(default = "default_initial_admin_email")]
    pub initial_admin_email: String,

    /// Enables the local HMAC session-cookie mode (development only)
    #[serde(default)]
    pub dev_auth_enabled: bool,

    /// HMAC-SHA256 secret for local session tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,

    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: u64,

    /// Lifetime of the login state cookie
    #[serde(default = "default_state_max_age")]
    pub state_max_age_secs: u64,

    /// Mark cookies `Secure` (disable only for plain-http local testing)
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

fn default_initial_admin_email() -> String {
    "admin@example.com".into()
}
fn default_session_max_age() -> u64 {
    60 * 60 * 24
}
fn default_state_max_age() -> u64 {
    600
}

impl AuthConfig {
    /// The identity mode this configuration selects.
    pub fn mode(&self) -> Result<AuthMode, ConfigError> {
        if self.dev_auth_enabled {
            return Ok(AuthMode::LocalSession);
        }
        if self.oidc.issuer.is_some() && self.oidc.client_id.is_some() {
            return Ok(AuthMode::Federated);
        }
        Err(ConfigError::ValidationError(
            "no identity mode configured: set auth.oidc.issuer and auth.oidc.client_id, or enable auth.dev_auth_enabled".into(),
        ))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oidc: OidcConfig::default(),
            initial_admin_email: default_initial_admin_email(),
            dev_auth_enabled: false,
            session_secret: None,
            session_max_age_secs: default_session_max_age(),
            state_max_age_secs: default_state_max_age(),
            secure_cookies: true,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("oidc", &self.oidc)
            .field("initial_admin_email", &self.initial_admin_email)
            .field("dev_auth_enabled", &self.dev_auth_enabled)
            .field("session_secret", &redact(&self.session_secret))
            .field("session_max_age_secs", &self.session_max_age_secs)
            .field("state_max_age_secs", &self.state_max_age_secs)
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery lives at `{issuer}/.well-known/openid-configuration`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Expected `aud` claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Accepted signing algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,

    /// Clock skew tolerance for `exp`/`iat`
    #[serde(default)]
    pub leeway_secs: u64,

    /// Timeout for discovery and key-set fetches
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".into()]
}
fn default_fetch_timeout() -> u64 {
    10
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: None,
            algorithms: default_algorithms(),
            leeway_secs: 0,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Index backend: "sqlite" or "in_memory"
    #[serde(default = "default_retrieval_backend")]
    pub backend: String,

    /// Prefix of every collection name
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Passages handed to the answering model per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Idle lifetime of a session's ephemeral index
    #[serde(default = "default_ephemeral_ttl")]
    pub ephemeral_ttl_secs: u64,

    /// Upper bound on live ephemeral indices per tenant
    #[serde(default = "default_max_ephemeral")]
    pub max_ephemeral_sessions: usize,
}

fn default_retrieval_backend() -> String {
    "sqlite".into()
}
fn default_collection_prefix() -> String {
    "llm_documents".into()
}
fn default_top_k() -> usize {
    4
}
fn default_ephemeral_ttl() -> u64 {
    60 * 60
}
fn default_max_ephemeral() -> usize {
    256
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            collection_prefix: default_collection_prefix(),
            top_k: default_top_k(),
            ephemeral_ttl_secs: default_ephemeral_ttl(),
            max_ephemeral_sessions: default_max_ephemeral(),
        }
    }
}

// ── Uploads ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Lowercase extensions without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_size_mb() -> u64 {
    30
}
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "txt", "md", "docx", "xlsx", "pptx"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.domgate/config.toml).
    ///
    /// Environment variables override file values:
    /// - `DOMGATE_API_KEY` (falls back to `OPENAI_API_KEY`)
    /// - `DOMGATE_PROVIDER`, `DOMGATE_MODEL`
    /// - `DOMGATE_DATABASE_URL`
    /// - `DOMGATE_SESSION_SECRET`, `DOMGATE_DEV_AUTH`
    /// - `DOMGATE_OIDC_ISSUER`, `DOMGATE_OIDC_CLIENT_ID`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("DOMGATE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(provider) = lookup("DOMGATE_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("DOMGATE_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("DOMGATE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(secret) = lookup("DOMGATE_SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
        if let Some(flag) = lookup("DOMGATE_DEV_AUTH") {
            self.auth.dev_auth_enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(issuer) = lookup("DOMGATE_OIDC_ISSUER") {
            self.auth.oidc.issuer = Some(issuer);
        }
        if let Some(client_id) = lookup("DOMGATE_OIDC_CLIENT_ID") {
            self.auth.oidc.client_id = Some(client_id);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".domgate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.project_name.trim().is_empty() {
            return Err(ConfigError::ValidationError("project_name must not be empty".into()));
        }

        if self.auth.dev_auth_enabled {
            match self.auth.session_secret.as_deref() {
                None => {
                    return Err(ConfigError::ValidationError(
                        "auth.session_secret is required when dev auth is enabled".into(),
                    ));
                }
                Some(PLACEHOLDER_SESSION_SECRET) => {
                    return Err(ConfigError::ValidationError(
                        "auth.session_secret still holds the placeholder value".into(),
                    ));
                }
                Some(secret) if secret.len() < MIN_SESSION_SECRET_LEN => {
                    return Err(ConfigError::ValidationError(format!(
                        "auth.session_secret must be at least {MIN_SESSION_SECRET_LEN} characters"
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(issuer) = &self.auth.oidc.issuer
            && !(issuer.starts_with("https://") || issuer.starts_with("http://"))
        {
            return Err(ConfigError::ValidationError(
                "auth.oidc.issuer must be an http(s) URL".into(),
            ));
        }

        if self.auth.oidc.algorithms.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.oidc.algorithms must list at least one algorithm".into(),
            ));
        }

        if !matches!(self.retrieval.backend.as_str(), "sqlite" | "in_memory" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.backend '{}' is not one of sqlite, in_memory",
                self.retrieval.backend
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }

        if self.retrieval.max_ephemeral_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_ephemeral_sessions must be > 0".into(),
            ));
        }

        if self.uploads.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "uploads.max_file_size_mb must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Default config TOML, written by `domgate onboard`.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
            retrieval: RetrievalConfig::default(),
            uploads: UploadConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
