//! Signed session tokens for the local session-cookie mode.
//!
//! Format: `base64url(canonical_json(payload)) + "." + hex(HMAC-SHA256(secret, encoded_payload))`
//! where canonical JSON has sorted object keys and no whitespace. The MAC
//! covers the encoded payload exactly as received, so verification never
//! re-serializes anything before comparing.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use domgate_core::error::AuthError;
use domgate_core::identity::AuthenticatedUser;
use domgate_core::ids::{TenantId, UserId};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 MAC length.
const SIGNATURE_HEX_LEN: usize = 64;

/// Identity carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn for_user(user: &AuthenticatedUser, max_age_secs: u64) -> Self {
        let iat = Utc::now().timestamp();
        Self {
            sub: user.user_id.clone(),
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            iat,
            exp: iat.saturating_add(i64::try_from(max_age_secs).unwrap_or(i64::MAX)),
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

/// Signs and verifies session tokens with one server-held secret.
#[derive(Clone)]
pub struct SessionCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec").field("secret", &"[redacted]").finish()
    }
}

impl SessionCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, AuthError> {
        let json = canonical_json(payload).map_err(|e| AuthError::Malformed(format!("payload: {e}")))?;
        let encoded = URL_SAFE_NO_PAD.encode(json.as_bytes());
        let signature = hex::encode(self.mac(&encoded)?.finalize().into_bytes());
        Ok(format!("{encoded}.{signature}"))
    }

    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let (encoded, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| AuthError::Malformed("missing delimiter".into()))?;

        if signature.len() != SIGNATURE_HEX_LEN
            || !signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(AuthError::Malformed("signature is not lowercase hex".into()));
        }
        let expected = hex::decode(signature).map_err(|e| AuthError::Malformed(format!("signature: {e}")))?;

        // verify_slice compares in constant time
        self.mac(encoded)?
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| AuthError::Malformed(format!("payload encoding: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| AuthError::Malformed(format!("payload: {e}")))
    }

    fn mac(&self, encoded: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Malformed(format!("session secret: {e}")))?;
        mac.update(encoded.as_bytes());
        Ok(mac)
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&sort_keys(serde_json::to_value(payload)?))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
