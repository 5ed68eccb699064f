//! Development-only auth introspection

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::session::SessionManager;
use crate::models::UserRecord;

/// Auth store view included in [`AuthDebugReport`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStoreReport {
    pub is_valid: bool,
    pub model: Option<UserRecord>,
    pub token_present: bool,
}

/// Everything the session layer knows, in one place
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDebugReport {
    pub current_user: Option<UserRecord>,
    pub is_authenticated: bool,
    pub auth_loaded: bool,
    pub stored_auth: Option<Value>,
    pub auth_store: AuthStoreReport,
}

pub struct DebugConsole {
    session: Arc<SessionManager>,
}

impl DebugConsole {
    pub fn new(session: Arc<SessionManager>) -> Self {
        tracing::info!("Auth debug console enabled");
        Self { session }
    }

    pub fn check_state(&self) -> AuthDebugReport {
        let snapshot = self.session.snapshot();
        let store = self.session.auth_store().credentials();

        let report = AuthDebugReport {
            current_user: snapshot.current_user().cloned(),
            is_authenticated: snapshot.is_authenticated(),
            auth_loaded: snapshot.auth_loaded(),
            stored_auth: self.session.cache().raw(),
            auth_store: AuthStoreReport {
                is_valid: self.session.auth_store().is_valid(),
                model: store.record,
                token_present: !store.token.is_empty(),
            },
        };

        tracing::info!(
            "Auth debug: authenticated={}, loaded={}, user={:?}, stored={}, store_valid={}, token_present={}",
            report.is_authenticated,
            report.auth_loaded,
            report.current_user.as_ref().map(|u| u.id.as_str()),
            report.stored_auth.is_some(),
            report.auth_store.is_valid,
            report.auth_store.token_present
        );
        report
    }

    /// Erase persisted auth data. In-memory credentials are left alone.
    pub fn clear_all(&self) {
        self.session.cache().clear();
        tracing::info!("All stored auth data cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::services::session::SessionSettings;
    use crate::services::session_cache::{SessionCache, LEGACY_AUTH_STORAGE_KEY};
    use crate::storage::{KeyValueStorage, MemoryStorage};

    #[tokio::test]
    async fn test_check_state_and_clear_all() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_user(UserRecord::new("u1", "ada@example.com"));
        let storage = Arc::new(MemoryStorage::new());
        let cache = SessionCache::new(storage.clone());
        cache
            .save(&backend.issue_token("u1"), &UserRecord::new("u1", "ada@example.com"))
            .unwrap();
        storage.set(LEGACY_AUTH_STORAGE_KEY, "{}").unwrap();

        let session = Arc::new(SessionManager::new(backend, cache, SessionSettings::default()));
        session.initialize().await;
        let console = DebugConsole::new(session.clone());

        let report = console.check_state();
        assert!(report.is_authenticated);
        assert!(report.auth_loaded);
        assert!(report.auth_store.token_present);
        assert_eq!(report.stored_auth.unwrap()["model"]["id"], "u1");

        console.clear_all();
        assert!(storage.is_empty());
        let report = console.check_state();
        assert!(report.stored_auth.is_none());
        assert!(report.auth_store.is_valid);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["authStore"]["tokenPresent"].as_bool().unwrap());
    }
}
