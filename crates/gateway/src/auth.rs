//! Request authentication and the local-session login flow.
//!
//! Every `/v1` route except the login endpoints runs behind
//! [`require_identity`]. A bearer token is checked against the identity
//! provider; without one, the signed session cookie is used.

use axum::extract::{Query, Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::middleware::Next;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::{Extension, Json};
use domgate_config::AuthMode;
use domgate_core::error::{AuthError, Result};
use domgate_core::identity::AuthenticatedUser;
use domgate_security::state::{
    SESSION_COOKIE, STATE_COOKIE, clear_cookie, mint_state, read_cookie, set_cookie, verify_state,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::{AppState, SharedState};

pub const DEV_CALLBACK_PATH: &str = "/v1/auth/dev/callback";

/// Resolve the caller and attach it to the request as an extension.
pub async fn require_identity(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let identity = authenticate(&state, req.headers()).await?;
    debug!(user = %identity.user_id, tenant = %identity.tenant_id, "Request authenticated");
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser> {
    if let Some(token) = bearer_token(headers) {
        return state.verifier.verify_bearer(token).await;
    }
    if let Some(token) = cookie(headers, SESSION_COOKIE) {
        return state.verifier.verify_session_cookie(token).await;
    }
    Err(AuthError::MissingCredentials.into())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|header| read_cookie(header, name))
}

// ── Handlers ────────────────────────────────────────────────────────────

pub async fn me_handler(Extension(identity): Extension<AuthenticatedUser>) -> Json<AuthenticatedUser> {
    Json(identity)
}

#[derive(Serialize)]
struct LoginStart {
    state: String,
    callback: &'static str,
}

/// Begin a local-session login: hand out an anti-forgery state value and
/// pin it in a short-lived cookie.
pub async fn dev_login_handler(State(state): State<SharedState>) -> std::result::Result<Response, ApiError> {
    if state.verifier.mode() != AuthMode::LocalSession {
        return Err(ApiError(AuthError::ModeDisabled("session cookie").into()));
    }
    let value = mint_state();
    let auth = &state.config.auth;
    let cookie = set_cookie(STATE_COOKIE, &value, auth.state_max_age_secs, auth.secure_cookies);
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginStart {
            state: value,
            callback: DEV_CALLBACK_PATH,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    state: Option<String>,
    #[serde(default)]
    email: String,
}

/// Finish a local-session login and issue the session cookie.
pub async fn dev_callback_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> std::result::Result<Response, ApiError> {
    verify_state(cookie(&headers, STATE_COOKIE), params.state.as_deref())
        .map_err(|e| state.verifier.reject_login_state(e))?;

    let identity = state.verifier.dev_login(&params.email).await?;
    let token = state.verifier.issue_session(&identity)?;

    let secure = state.config.auth.secure_cookies;
    let session = set_cookie(SESSION_COOKIE, &token, state.verifier.session_max_age_secs(), secure);
    Ok((
        AppendHeaders([(SET_COOKIE, session), (SET_COOKIE, clear_cookie(STATE_COOKIE, secure))]),
        Json(identity),
    )
        .into_response())
}
