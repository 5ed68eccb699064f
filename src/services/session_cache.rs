//! Persisted session cache
//!
//! Stores the current session under a single versioned key as
//! `{token, model, savedAt}`. Anything that fails to load cleanly (bad JSON,
//! missing fields, an expired token) is treated as absent and erased.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{token_expired_at, Session, UserRecord};
use crate::storage::{DynStorage, StorageError};

/// Key holding the current session
pub const AUTH_STORAGE_KEY: &str = "pocketbase_auth_v2";
/// Key used by earlier releases; erased on clear, never written
pub const LEGACY_AUTH_STORAGE_KEY: &str = "pocketbase_auth";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAuth {
    token: String,
    model: UserRecord,
    /// Epoch milliseconds
    saved_at: i64,
}

#[derive(Clone)]
pub struct SessionCache {
    storage: DynStorage,
}

impl SessionCache {
    pub fn new(storage: DynStorage) -> Self {
        Self { storage }
    }

    /// Load the persisted session, if a usable one exists.
    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        self.load_at(Utc::now())
    }

    /// Load as of `now`; tokens whose `exp` is before `now` are discarded.
    pub fn load_at(&self, now: DateTime<Utc>) -> Result<Option<Session>, StorageError> {
        let raw = match self.storage.get(AUTH_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupt { path, message }) => {
                tracing::warn!("Stored auth unreadable in {}: {}", path, message);
                self.clear();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some((token, record, saved_at)) = parse_stored(&raw) else {
            tracing::warn!("Invalid stored auth data, discarding it");
            self.clear();
            return Ok(None);
        };

        if token_expired_at(&token, now) {
            tracing::info!("Stored token has expired, discarding it");
            self.clear();
            return Ok(None);
        }

        Ok(Some(Session {
            token,
            record,
            saved_at: saved_at.unwrap_or(now),
        }))
    }

    /// Persist `token` and `record`; empty tokens are not written.
    pub fn save(&self, token: &str, record: &UserRecord) -> Result<(), StorageError> {
        if token.is_empty() {
            tracing::debug!("Skipping save of empty token");
            return Ok(());
        }

        let stored = StoredAuth {
            token: token.to_string(),
            model: record.clone(),
            saved_at: Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&stored).map_err(|e| StorageError::Corrupt {
            path: AUTH_STORAGE_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.storage.set(AUTH_STORAGE_KEY, &json)
    }

    /// Erase the current and legacy keys. Failures are logged.
    pub fn clear(&self) {
        for key in [AUTH_STORAGE_KEY, LEGACY_AUTH_STORAGE_KEY] {
            if let Err(e) = self.storage.remove(key) {
                tracing::error!("Failed to clear stored auth '{}': {}", key, e);
            }
        }
    }

    /// Stored entry as JSON, or as a plain string when it is not JSON.
    pub fn raw(&self) -> Option<Value> {
        let raw = self.storage.get(AUTH_STORAGE_KEY).ok()??;
        Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }
}

/// Structural validation of the stored document.
fn parse_stored(raw: &str) -> Option<(String, UserRecord, Option<DateTime<Utc>>)> {
    let value: Value = serde_json::from_str(raw).ok()?;

    let token = value.get("token")?.as_str()?.to_string();
    if token.is_empty() {
        return None;
    }
    let record = UserRecord::from_value(value.get("model")?.clone())?;
    let saved_at = value
        .get("savedAt")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Some((token, record, saved_at))
}
