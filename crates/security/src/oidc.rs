//! Federated ID-token verification against an OIDC issuer.
//!
//! The discovery document and the key set are fetched lazily and cached for
//! the process lifetime. A token whose `kid` is not in the cached key set
//! triggers one key-set refetch so that issuer key rotation is followed
//! without a restart. Refetches are at least [`KEY_REFETCH_COOLDOWN`] apart;
//! inside that window an unknown `kid` is rejected from the cache.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domgate_config::OidcConfig;
use domgate_core::error::AuthError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Minimum spacing between two key-set fetches.
pub const KEY_REFETCH_COOLDOWN: Duration = Duration::from_secs(60);

/// Fetches JSON documents (discovery, JWKS) from the identity provider.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<serde_json::Value, AuthError>;
}

/// [`JsonFetcher`] over HTTPS.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<serde_json::Value, AuthError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::Discovery(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Discovery(format!("GET {url}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("GET {url}: {e}")))
    }
}

/// Claims every accepted ID token must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: serde_json::Value,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct OidcVerifier {
    issuer: String,
    client_id: String,
    algorithms: Vec<Algorithm>,
    leeway_secs: u64,
    fetcher: Arc<dyn JsonFetcher>,
    jwks_uri: RwLock<Option<String>>,
    keys: RwLock<Option<JwkSet>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl OidcVerifier {
    /// Build from `[auth.oidc]`. Fails when the issuer or client id is
    /// missing or an algorithm name is unknown.
    pub fn new(config: &OidcConfig, fetcher: Arc<dyn JsonFetcher>) -> Result<Self, AuthError> {
        let (Some(issuer), Some(client_id)) = (&config.issuer, &config.client_id) else {
            return Err(AuthError::ModeDisabled("federated"));
        };
        let algorithms = config
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| AuthError::InvalidClaims(format!("unsupported algorithm '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            issuer: issuer.clone(),
            client_id: client_id.clone(),
            algorithms,
            leeway_secs: config.leeway_secs,
            fetcher,
            jwks_uri: RwLock::new(None),
            keys: RwLock::new(None),
            last_refresh: Mutex::new(None),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify signature, issuer, audience and the mandatory claims.
    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(map_jwt_error)?;
        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidClaims(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("token header has no kid".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.algorithms.clone();
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        // iat and email are enforced by IdTokenClaims having no optional fields
        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation).map_err(map_jwt_error)?;
        Ok(data.claims)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cached_key(kid).await? {
            return Ok(key);
        }
        {
            // Claim the refetch under the lock so concurrent misses fetch once.
            let mut last = self.last_refresh.lock().await;
            if last.is_some_and(|at| at.elapsed() < KEY_REFETCH_COOLDOWN) {
                debug!(kid, "Unknown kid inside refetch cooldown");
                return Err(AuthError::UnknownKey(kid.to_string()));
            }
            *last = Some(Instant::now());
        }
        info!(kid, "Signing key not cached, refetching key set");
        self.refresh_keys().await?;
        self.cached_key(kid)
            .await?
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    /// Look `kid` up in the cached key set, fetching it on first use.
    async fn cached_key(&self, kid: &str) -> Result<Option<DecodingKey>, AuthError> {
        if self.keys.read().await.is_none() {
            self.refresh_keys().await?;
        }
        let keys = self.keys.read().await;
        let Some(jwk) = keys.as_ref().and_then(|set| set.find(kid)) else {
            return Ok(None);
        };
        DecodingKey::from_jwk(jwk)
            .map(Some)
            .map_err(|e| AuthError::Discovery(format!("unusable key '{kid}': {e}")))
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        let uri = self.jwks_uri().await?;
        *self.last_refresh.lock().await = Some(Instant::now());
        let document = self.fetcher.fetch(&uri).await?;
        let set: JwkSet = serde_json::from_value(document)
            .map_err(|e| AuthError::Discovery(format!("key set at {uri}: {e}")))?;
        debug!(keys = set.keys.len(), "Key set loaded");
        *self.keys.write().await = Some(set);
        Ok(())
    }

    async fn jwks_uri(&self) -> Result<String, AuthError> {
        if let Some(uri) = self.jwks_uri.read().await.as_ref() {
            return Ok(uri.clone());
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );
        let document = self.fetcher.fetch(&url).await.inspect_err(|e| {
            warn!(url = %url, error = %e, "OIDC discovery failed");
        })?;
        let uri = document
            .get("jwks_uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::Discovery("jwks_uri missing from discovery document".into()))?
            .to_string();

        *self.jwks_uri.write().await = Some(uri.clone());
        Ok(uri)
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Json(_) => AuthError::InvalidClaims(e.to_string()),
        _ => AuthError::Malformed(e.to_string()),
    }
}
