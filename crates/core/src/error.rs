//! Error types for the gateway domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] folds them into the
//! taxonomy the outer adapters map onto status codes.

use thiserror::Error;

/// The top-level error type for all gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Identity ---
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("Not authorized: {reason}")]
    Authorization { reason: String },

    #[error("Administrator privileges required")]
    AdminRequired,

    // --- Data access ---
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(StoreError),

    // --- Lifecycle ---
    #[error("Reset of session {session_id} aborted: {reason}")]
    ResetAborted { session_id: String, reason: String },

    // --- Backends ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn authorization(reason: impl Into<String>) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Store "not found" surfaces as [`Error::NotFound`]; a row owned by another
/// tenant goes through the same arm so the two cases stay indistinguishable.
impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::TenantMismatch { entity } => Self::Authorization {
                reason: format!("{entity} belongs to a different tenant"),
            },
            other => Self::Persistence(other),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("no signing key matches kid '{0}'")]
    UnknownKey(String),

    #[error("identity provider unavailable: {0}")]
    Discovery(String),

    #[error("login state mismatch")]
    StateMismatch,

    #[error("{0} authentication is not enabled")]
    ModeDisabled(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} row carries a tenant other than the caller's")]
    TenantMismatch { entity: &'static str },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt row in {table}: {reason}")]
    Decode { table: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Index error: {0}")]
    Index(String),

    #[error("Answer generation failed: {0}")]
    Generation(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn store_not_found_folds_into_not_found() {
        let err: Error = StoreError::NotFound {
            entity: "ChatSession",
            id: "s-1".into(),
        }
        .into();
        assert!(matches!(err, Error::NotFound { entity: "ChatSession", .. }));
    }

    #[test]
    fn store_failures_fold_into_persistence() {
        let err: Error = StoreError::Constraint("UNIQUE constraint failed".into()).into();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn reset_aborted_names_the_session() {
        let err = Error::ResetAborted {
            session_id: "s-42".into(),
            reason: "episodic memory write failed".into(),
        };
        assert!(err.to_string().contains("s-42"));
    }
}
