//! Session model

use chrono::{DateTime, TimeZone, Utc};
use data_encoding::{BASE64URL_NOPAD, BASE64_NOPAD};
use serde::{Deserialize, Serialize};

use super::UserRecord;

/// Authenticated identity held by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Backend auth token
    pub token: String,
    /// Owner of the token
    pub record: UserRecord,
    /// When the session was last persisted
    pub saved_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, record: UserRecord) -> Self {
        Self {
            token: token.into(),
            record,
            saved_at: Utc::now(),
        }
    }

    /// Check if the token carries an expiry claim in the past
    pub fn is_expired(&self) -> bool {
        token_expired_at(&self.token, Utc::now())
    }
}

/// Claims read from the middle segment of a three-part token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the epoch
    #[serde(default)]
    pub exp: Option<f64>,
    /// Record ID the token was issued for
    #[serde(default)]
    pub id: Option<String>,
    /// Token type (`auth`, `file`, ...)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl TokenClaims {
    /// Decode the claims of `token`.
    ///
    /// Returns `None` for tokens that are not three dot-separated segments or
    /// whose payload is not base64-encoded JSON.
    pub fn decode(token: &str) -> Option<Self> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return None;
        }

        let payload = parts[1].trim_end_matches('=');
        let bytes = BASE64URL_NOPAD
            .decode(payload.as_bytes())
            .or_else(|_| BASE64_NOPAD.decode(payload.as_bytes()))
            .ok()?;

        serde_json::from_slice(&bytes).ok()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp?;
        Utc.timestamp_opt(exp.trunc() as i64, 0).single()
    }
}

/// True when `token` has an expiry claim strictly before `now`.
///
/// Tokens without readable claims are never considered expired.
pub fn token_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    TokenClaims::decode(token)
        .and_then(|claims| claims.exp)
        .map(|exp| exp < now.timestamp() as f64)
        .unwrap_or(false)
}

/// Observable projection of the current session.
///
/// Fields only change together through [`AuthSnapshot::with_user`] and
/// [`AuthSnapshot::loaded`], so `is_authenticated` always implies
/// `current_user` is set, and `auth_loaded` never goes back to false.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    current_user: Option<UserRecord>,
    is_authenticated: bool,
    auth_loaded: bool,
}

impl AuthSnapshot {
    pub fn current_user(&self) -> Option<&UserRecord> {
        self.current_user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn auth_loaded(&self) -> bool {
        self.auth_loaded
    }

    /// Replace the user, keeping `auth_loaded` as is.
    pub fn with_user(&self, user: Option<UserRecord>) -> Self {
        Self {
            is_authenticated: user.is_some(),
            current_user: user,
            auth_loaded: self.auth_loaded,
        }
    }

    /// Mark the first initialization attempt as finished.
    pub fn loaded(&self) -> Self {
        Self {
            auth_loaded: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: serde_json::Value) -> String {
    let header = BASE64URL_NOPAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = BASE64URL_NOPAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.signature", header, payload)
}
