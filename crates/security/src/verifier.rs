//! Identity verification: turns a bearer token or a session cookie into an
//! [`AuthenticatedUser`], provisioning the tenant and user on first sight.
//!
//! Exactly one mode is active per deployment. Federated mode verifies OIDC
//! ID tokens; local session mode verifies HMAC-signed session cookies issued
//! after the dev login handshake.

use std::sync::Arc;

use chrono::Utc;
use domgate_config::{AppConfig, AuthMode};
use domgate_core::error::{AuthError, Error, Result, StoreError};
use domgate_core::identity::AuthenticatedUser;
use domgate_core::model::{Tenant, User};
use domgate_store::Database;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome, Credential};
use crate::oidc::{JsonFetcher, OidcVerifier};
use crate::session_token::{SessionClaims, SessionCodec};

/// Credential value stored for users that never log in with a password.
pub const FEDERATED_PASSWORD_SENTINEL: &str = "OIDC_USER_DUMMY_PASSWORD";

pub struct IdentityVerifier {
    db: Database,
    mode: AuthMode,
    project_name: String,
    initial_admin_email: String,
    session_max_age_secs: u64,
    oidc: Option<OidcVerifier>,
    sessions: Option<SessionCodec>,
    audit: Arc<AuditLogger>,
}

impl IdentityVerifier {
    pub fn new(config: &AppConfig, db: Database, fetcher: Arc<dyn JsonFetcher>) -> Result<Self> {
        let mode = config.auth.mode().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let (oidc, sessions) = match mode {
            AuthMode::Federated => (Some(OidcVerifier::new(&config.auth.oidc, fetcher)?), None),
            AuthMode::LocalSession => {
                let secret = config.auth.session_secret.as_deref().ok_or_else(|| Error::Config {
                    message: "auth.session_secret is required for session cookies".into(),
                })?;
                (None, Some(SessionCodec::new(secret)))
            }
        };

        info!(?mode, "Identity verifier ready");
        Ok(Self {
            db,
            mode,
            project_name: config.project_name.clone(),
            initial_admin_email: config.auth.initial_admin_email.clone(),
            session_max_age_secs: config.auth.session_max_age_secs,
            oidc,
            sessions,
            audit: Arc::new(AuditLogger::default()),
        })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn session_max_age_secs(&self) -> u64 {
        self.session_max_age_secs
    }

    // ── Federated ──────────────────────────────────────────────────────

    /// Verify an OIDC ID token and resolve (or provision) its user.
    pub async fn verify_bearer(&self, token: &str) -> Result<AuthenticatedUser> {
        let credential = Credential::BearerToken;
        let Some(oidc) = &self.oidc else {
            return Err(self.reject(credential, AuthError::ModeDisabled("federated")));
        };

        let claims = match oidc.verify(token).await {
            Ok(claims) => claims,
            Err(e) => return Err(self.reject(credential, e)),
        };
        debug!(sub = %claims.sub, "ID token verified");

        let user = self.provision(&claims.email).await?;
        self.admit(&user, credential)
    }

    // ── Local session ──────────────────────────────────────────────────

    /// Verify a signed session cookie and load its user.
    pub async fn verify_session_cookie(&self, token: &str) -> Result<AuthenticatedUser> {
        let credential = Credential::SessionCookie;
        let Some(codec) = &self.sessions else {
            return Err(self.reject(credential, AuthError::ModeDisabled("session cookie")));
        };

        let claims: SessionClaims = match codec.verify(token) {
            Ok(claims) => claims,
            Err(e) => return Err(self.reject(credential, e)),
        };
        if claims.is_expired_at(Utc::now().timestamp()) {
            return Err(self.reject(credential, AuthError::Expired));
        }

        let user = match self.db.system::<User>().find(claims.sub.as_str()).await? {
            Some(user) if user.tenant_id == claims.tenant_id => user,
            _ => {
                return Err(self.reject(
                    credential,
                    AuthError::InvalidClaims("session refers to an unknown user".into()),
                ));
            }
        };
        self.admit(&user, credential)
    }

    /// Complete the dev login handshake for `email`. The caller has already
    /// matched the state parameter against the state cookie.
    pub async fn dev_login(&self, email: &str) -> Result<AuthenticatedUser> {
        let credential = Credential::DevLogin;
        if self.sessions.is_none() {
            return Err(self.reject(credential, AuthError::ModeDisabled("session cookie")));
        }
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::validation("email", "a valid email address is required"));
        }

        let user = self.provision(email).await?;
        self.admit(&user, credential)
    }

    /// Sign a session token for `user`.
    pub fn issue_session(&self, user: &AuthenticatedUser) -> Result<String> {
        let codec = self
            .sessions
            .as_ref()
            .ok_or(AuthError::ModeDisabled("session cookie"))?;
        let token = codec.sign(&SessionClaims::for_user(user, self.session_max_age_secs))?;
        self.audit.log(
            AuditEvent::SessionIssued,
            &user.email,
            Some(user.tenant_id.as_str()),
            AuditOutcome::Success,
            None,
        );
        Ok(token)
    }

    /// Record a failed login handshake.
    pub fn reject_login_state(&self, error: AuthError) -> Error {
        self.audit.log(
            AuditEvent::LoginStateRejected,
            "anonymous",
            None,
            AuditOutcome::Denied,
            Some(error.to_string()),
        );
        error.into()
    }

    // ── Provisioning ───────────────────────────────────────────────────

    /// Resolve the project tenant and the user with `email`, creating
    /// either when missing. Runs at system scope.
    async fn provision(&self, email: &str) -> Result<User> {
        let tenant = self.project_tenant().await?;

        let users = self.db.system::<User>();
        if let Some(user) = users.by_email(email).await? {
            return Ok(user);
        }

        let is_admin = email == self.initial_admin_email;
        let mut user = User::new(email, FEDERATED_PASSWORD_SENTINEL, is_admin);
        user.tenant_id = tenant.id.clone();
        match users.create(user).await {
            Ok(user) => {
                self.audit.log(
                    AuditEvent::UserProvisioned { is_admin },
                    email,
                    Some(tenant.id.as_str()),
                    AuditOutcome::Success,
                    None,
                );
                Ok(user)
            }
            // A concurrent request provisioned the same email first
            Err(StoreError::Constraint(_)) => users
                .by_email(email)
                .await?
                .ok_or_else(|| Error::Internal(format!("user {email} vanished after conflict"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn project_tenant(&self) -> Result<Tenant> {
        let tenants = self.db.system::<Tenant>();
        if let Some(tenant) = tenants.by_name(&self.project_name).await? {
            return Ok(tenant);
        }

        match tenants.create(Tenant::new(&self.project_name)).await {
            Ok(tenant) => {
                self.audit.log(
                    AuditEvent::TenantProvisioned {
                        name: tenant.name.clone(),
                    },
                    "system",
                    Some(tenant.id.as_str()),
                    AuditOutcome::Success,
                    None,
                );
                Ok(tenant)
            }
            Err(StoreError::Constraint(_)) => tenants
                .by_name(&self.project_name)
                .await?
                .ok_or_else(|| Error::Internal("project tenant vanished after conflict".into())),
            Err(e) => Err(e.into()),
        }
    }

    // ── Outcomes ───────────────────────────────────────────────────────

    fn admit(&self, user: &User, credential: Credential) -> Result<AuthenticatedUser> {
        if !user.is_active {
            self.audit.log(
                AuditEvent::InactiveRejected,
                &user.email,
                Some(user.tenant_id.as_str()),
                AuditOutcome::Denied,
                None,
            );
            return Err(Error::authorization("Inactive user"));
        }
        self.audit.log(
            AuditEvent::IdentityVerified { credential },
            &user.email,
            Some(user.tenant_id.as_str()),
            AuditOutcome::Success,
            None,
        );
        Ok(AuthenticatedUser::from(user))
    }

    fn reject(&self, credential: Credential, error: AuthError) -> Error {
        self.audit.log(
            AuditEvent::AuthFailure { credential },
            "anonymous",
            None,
            AuditOutcome::Failure,
            Some(error.to_string()),
        );
        error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::tests::{StaticFetcher, claims_for, oidc_config, sign};
    use domgate_core::ids::TenantId;

    const KEY: &[u8] = b"federated-test-signing-key-000001";
    const SESSION_SECRET: &str = "local-session-secret-for-tests-0123456789";

    fn federated_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.oidc = oidc_config();
        config
    }

    fn session_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.dev_auth_enabled = true;
        config.auth.session_secret = Some(SESSION_SECRET.into());
        config
    }

    async fn federated() -> (IdentityVerifier, Database) {
        let db = Database::in_memory().await.unwrap();
        let fetcher = Arc::new(StaticFetcher::with_keys(&[("k1", KEY)]));
        let verifier = IdentityVerifier::new(&federated_config(), db.clone(), fetcher)
            .unwrap()
            .with_audit(Arc::new(AuditLogger::new()));
        (verifier, db)
    }

    async fn local() -> (IdentityVerifier, Database) {
        let db = Database::in_memory().await.unwrap();
        let fetcher = Arc::new(StaticFetcher::with_keys(&[]));
        let verifier = IdentityVerifier::new(&session_config(), db.clone(), fetcher)
            .unwrap()
            .with_audit(Arc::new(AuditLogger::new()));
        (verifier, db)
    }

    #[tokio::test]
    async fn first_bearer_login_provisions_tenant_and_user() {
        let (verifier, db) = federated().await;
        let token = sign("k1", KEY, &claims_for("ana@example.com"));

        let identity = verifier.verify_bearer(&token).await.unwrap();
        assert_eq!(identity.email, "ana@example.com");
        assert!(identity.is_active);
        assert!(!identity.is_admin);

        let tenant = db
            .system::<Tenant>()
            .by_name("DOM Enterprise Gateway")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.tenant_id, tenant.id);
        let user = db.system::<User>().by_email("ana@example.com").await.unwrap().unwrap();
        assert_eq!(user.hashed_password, FEDERATED_PASSWORD_SENTINEL);

        // Second login reuses both rows
        let again = verifier.verify_bearer(&token).await.unwrap();
        assert_eq!(again.user_id, identity.user_id);
        assert_eq!(db.system::<User>().count(Default::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bootstrap_admin_email_gets_admin_flag() {
        let (verifier, _db) = federated().await;
        let token = sign("k1", KEY, &claims_for("admin@example.com"));
        assert!(verifier.verify_bearer(&token).await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn invalid_bearer_is_authentication_error_and_audited() {
        let (verifier, db) = federated().await;
        let token = sign("k1", b"not-the-published-key-at-all-0000", &claims_for("ana@example.com"));

        let err = verifier.verify_bearer(&token).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(AuthError::InvalidSignature)));
        assert_eq!(verifier.audit().entries_by_outcome(&AuditOutcome::Failure).len(), 1);
        assert!(db.system::<User>().by_email("ana@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_user_is_forbidden() {
        let (verifier, db) = federated().await;
        let token = sign("k1", KEY, &claims_for("ana@example.com"));
        verifier.verify_bearer(&token).await.unwrap();

        let users = db.system::<User>();
        let mut user = users.by_email("ana@example.com").await.unwrap().unwrap();
        user.is_active = false;
        users.update(&user).await.unwrap();

        let err = verifier.verify_bearer(&token).await.unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
    }

    #[tokio::test]
    async fn modes_are_never_mixed() {
        let (federated, _) = federated().await;
        assert!(matches!(
            federated.verify_session_cookie("x.y").await,
            Err(Error::Authentication(AuthError::ModeDisabled(_)))
        ));
        assert!(federated.dev_login("ana@example.com").await.is_err());

        let (local, _) = local().await;
        assert!(matches!(
            local.verify_bearer("a.b.c").await,
            Err(Error::Authentication(AuthError::ModeDisabled(_)))
        ));
    }

    #[tokio::test]
    async fn dev_login_session_round_trip() {
        let (verifier, _db) = local().await;
        let identity = verifier.dev_login("dev@example.com").await.unwrap();
        let token = verifier.issue_session(&identity).unwrap();

        let verified = verifier.verify_session_cookie(&token).await.unwrap();
        assert_eq!(verified, identity);
    }

    #[tokio::test]
    async fn tampered_cookie_is_rejected() {
        let (verifier, _db) = local().await;
        let identity = verifier.dev_login("dev@example.com").await.unwrap();
        let token = verifier.issue_session(&identity).unwrap();

        let mut tampered = token.into_bytes();
        tampered[0] ^= 0x01;
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(matches!(
            verifier.verify_session_cookie(&tampered).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn cookie_for_foreign_tenant_is_rejected() {
        let (verifier, _db) = local().await;
        let mut identity = verifier.dev_login("dev@example.com").await.unwrap();
        identity.tenant_id = TenantId::new();
        let token = verifier.issue_session(&identity).unwrap();

        assert!(matches!(
            verifier.verify_session_cookie(&token).await,
            Err(Error::Authentication(AuthError::InvalidClaims(_)))
        ));
    }

    #[tokio::test]
    async fn dev_login_requires_an_email() {
        let (verifier, _db) = local().await;
        assert!(matches!(
            verifier.dev_login("  ").await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_mode_is_a_config_error() {
        let db = Database::in_memory().await.unwrap();
        let fetcher = Arc::new(StaticFetcher::with_keys(&[]));
        assert!(matches!(
            IdentityVerifier::new(&AppConfig::default(), db, fetcher),
            Err(Error::Config { .. })
        ));
    }
}
