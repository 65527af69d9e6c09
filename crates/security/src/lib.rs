//! Identity and session security for the DOM gateway.
//!
//! Provides:
//! - **Federated verification**: OIDC ID tokens checked against the issuer's key set
//! - **Session tokens**: HMAC-signed cookies for the local dev mode
//! - **Login state**: single-use state values bound to same-site cookies
//! - **Audit logging**: structured identity events

pub mod audit;
pub mod oidc;
pub mod session_token;
pub mod state;
pub mod verifier;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, Credential, TracingSink};
pub use oidc::{HttpFetcher, IdTokenClaims, JsonFetcher, OidcVerifier};
pub use session_token::{SessionClaims, SessionCodec, canonical_json};
pub use state::{SESSION_COOKIE, STATE_COOKIE, clear_cookie, mint_state, read_cookie, set_cookie, verify_state};
pub use verifier::{FEDERATED_PASSWORD_SENTINEL, IdentityVerifier};
