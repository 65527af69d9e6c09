//! Login handshake state tokens and the cookies that carry them.
//!
//! The login step mints a random state value, returns it to the client and
//! binds it to a `SameSite=Lax` cookie. The callback step accepts only a
//! request whose state parameter equals the cookie value byte for byte, then
//! clears the cookie so the value cannot be replayed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use domgate_core::error::AuthError;
use rand::RngCore;
use subtle::ConstantTimeEq;

pub const STATE_COOKIE: &str = "domgate_state";
pub const SESSION_COOKIE: &str = "domgate_session";

const STATE_BYTES: usize = 32;

/// A fresh URL-safe random state value.
pub fn mint_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Accept only when both values are present, non-empty and identical.
pub fn verify_state(cookie_value: Option<&str>, received: Option<&str>) -> Result<(), AuthError> {
    match (cookie_value, received) {
        (Some(expected), Some(got))
            if !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(got.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(AuthError::StateMismatch),
    }
}

/// `Set-Cookie` value for an HTTP-only, same-site cookie.
pub fn set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes a cookie.
pub fn clear_cookie(name: &str, secure: bool) -> String {
    set_cookie(name, "", 0, secure)
}

/// Find a cookie in a `Cookie` request header.
pub fn read_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
