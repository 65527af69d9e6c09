//! Mapping from the domain error taxonomy onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domgate_core::error::Error;
use serde_json::json;
use tracing::{error, warn};

/// A domain error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// The status code a domain error is reported with.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Authentication(_) => StatusCode::UNAUTHORIZED,
        Error::Authorization { .. } | Error::AdminRequired => StatusCode::FORBIDDEN,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ResetAborted { .. } => StatusCode::CONFLICT,
        Error::Provider(_) | Error::Retrieval(_) => StatusCode::BAD_GATEWAY,
        Error::Persistence(_)
        | Error::Config { .. }
        | Error::Serialization(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = match &self.0 {
            Error::Authentication(reason) => json!({
                "error": "unauthenticated",
                "detail": format!("{reason}; please retry login"),
            }),
            Error::Authorization { reason } => json!({ "error": "forbidden", "detail": reason }),
            Error::AdminRequired => json!({ "error": "admin_required", "detail": self.0.to_string() }),
            Error::NotFound { entity, .. } => json!({
                "error": "not_found",
                "detail": format!("{entity} not found"),
            }),
            Error::Validation { field, message } => json!({
                "error": "validation_failed",
                "field": field,
                "detail": message,
            }),
            Error::ResetAborted { session_id, reason } => json!({
                "error": "reset_aborted",
                "session_id": session_id,
                "detail": reason,
            }),
            Error::Provider(_) | Error::Retrieval(_) => {
                warn!(error = %self.0, "Upstream failure");
                json!({ "error": "upstream_unavailable", "detail": self.0.to_string() })
            }
            _ => {
                error!(error = %self.0, "Request failed");
                json!({ "error": "internal", "detail": "Internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domgate_core::error::{AuthError, ProviderError, StoreError};
    use http_body_util::BodyExt;

    async fn body_of(err: Error) -> (StatusCode, serde_json::Value) {
        let response = ApiError(err).into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn authentication_asks_for_a_fresh_login() {
        let (status, body) = body_of(AuthError::Expired.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].as_str().unwrap().contains("retry login"));
    }

    #[tokio::test]
    async fn validation_names_the_field() {
        let (status, body) = body_of(Error::validation("content", "message must not be blank")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["field"], "content");
    }

    #[tokio::test]
    async fn reset_abort_is_a_conflict() {
        let (status, body) = body_of(Error::ResetAborted {
            session_id: "s-1".into(),
            reason: "disk full".into(),
        })
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["session_id"], "s-1");
    }

    #[tokio::test]
    async fn persistence_details_stay_internal() {
        let (status, body) = body_of(Error::Persistence(StoreError::Storage("no such table: users".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["detail"].as_str().unwrap().contains("users"));
    }

    #[tokio::test]
    async fn admin_gate_is_distinct_from_ownership() {
        let (status, body) = body_of(Error::AdminRequired).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "admin_required");

        let (status, body) = body_of(Error::authorization("not your session")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&Error::authorization("nope")), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&Error::NotFound { entity: "ChatSession", id: "x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::Provider(ProviderError::Timeout("30s".into()))),
            StatusCode::BAD_GATEWAY
        );
    }
}
