//! `domgate sign-session`: mint a session cookie value without a browser.
//!
//! Only available in local session mode. The user (and the project tenant)
//! are provisioned on first use, exactly as the dev login callback does.

use std::sync::Arc;
use std::time::Duration;

use domgate_config::AppConfig;
use domgate_security::state::SESSION_COOKIE;
use domgate_security::{HttpFetcher, IdentityVerifier};
use domgate_store::Database;

pub async fn run(email: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let token = issue(&config, email).await?;
    println!("{SESSION_COOKIE}={token}");
    Ok(())
}

pub async fn issue(config: &AppConfig, email: &str) -> domgate_core::Result<String> {
    let db = Database::connect(&config.database.url, 1).await?;
    let verifier = IdentityVerifier::new(config, db, Arc::new(HttpFetcher::new(Duration::from_secs(10))))?;
    let user = verifier.dev_login(email).await?;
    verifier.issue_session(&user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domgate_core::Error;

    fn dev_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".into();
        config.auth.dev_auth_enabled = true;
        config.auth.session_secret = Some("cli-test-secret-cli-test-secret-01".into());
        config
    }

    #[tokio::test]
    async fn issues_a_verifiable_token() {
        let config = dev_config();
        let token = issue(&config, "ana@acme.test").await.unwrap();
        assert!(!token.is_empty());
        assert!(!token.contains(';'));
    }

    #[tokio::test]
    async fn rejects_a_bad_email() {
        let err = issue(&dev_config(), "not-an-email").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn unavailable_in_federated_mode() {
        let mut config = dev_config();
        config.auth.dev_auth_enabled = false;
        config.auth.oidc.issuer = Some("https://login.example.test".into());
        config.auth.oidc.client_id = Some("domgate".into());
        assert!(issue(&config, "ana@acme.test").await.is_err());
    }
}
