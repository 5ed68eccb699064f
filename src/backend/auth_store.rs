//! In-memory credential holder
//!
//! Every backend client owns one `AuthStore`. Requests are authorized with
//! its token, auth endpoints write into it, and registered listeners are
//! told about every change so the session layer can publish and persist it.

use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::{token_expired_at, UserRecord};

/// Token and record currently held by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub token: String,
    pub record: Option<UserRecord>,
}

impl Credentials {
    /// Non-empty token plus a record.
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && self.record.is_some()
    }
}

type Listener = Arc<dyn Fn(&Credentials) + Send + Sync>;

#[derive(Default)]
pub struct AuthStore {
    state: RwLock<Credentials>,
    listeners: RwLock<Vec<Listener>>,
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.credentials();
        f.debug_struct("AuthStore")
            .field("token_present", &!state.token.is_empty())
            .field("record", &state.record.as_ref().map(|r| r.id.as_str()))
            .finish()
    }
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> Credentials {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn token(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).token.clone()
    }

    pub fn record(&self) -> Option<UserRecord> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).record.clone()
    }

    /// ID of the held record, if any
    pub fn user_id(&self) -> Option<String> {
        self.record().map(|r| r.id).filter(|id| !id.is_empty())
    }

    /// Non-empty token whose expiry claim, if any, is not in the past.
    pub fn is_valid(&self) -> bool {
        let token = self.token();
        !token.is_empty() && !token_expired_at(&token, Utc::now())
    }

    /// Replace the held credentials and notify listeners.
    pub fn save(&self, token: impl Into<String>, record: Option<UserRecord>) {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.token = token.into();
            state.record = record;
            state.clone()
        };
        self.notify(&snapshot);
    }

    /// Drop the held credentials and notify listeners.
    pub fn clear(&self) {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            *state = Credentials::default();
            state.clone()
        };
        self.notify(&snapshot);
    }

    /// Register a listener called after every `save` and `clear`.
    ///
    /// Listeners run on the caller's thread, outside the store's locks, so
    /// they may read the store again.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&Credentials) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    fn notify(&self, credentials: &Credentials) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(credentials);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::encode_test_token;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_save_and_clear() {
        let store = AuthStore::new();
        assert!(!store.is_valid());

        store.save("token", Some(UserRecord::new("u1", "a@b.c")));
        assert!(store.is_valid());
        assert_eq!(store.user_id().as_deref(), Some("u1"));
        assert!(store.credentials().is_complete());

        store.clear();
        assert!(!store.is_valid());
        assert!(store.record().is_none());
    }

    #[test]
    fn test_expired_token_is_not_valid() {
        let store = AuthStore::new();
        let expired = encode_test_token(json!({"exp": 1}));

        store.save(expired, Some(UserRecord::new("u1", "a@b.c")));

        assert!(!store.is_valid());
    }

    #[test]
    fn test_listeners_see_each_change_and_may_reenter() {
        let store = Arc::new(AuthStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let observed = calls.clone();
        let weak = Arc::downgrade(&store);
        store.on_change(move |creds| {
            observed.fetch_add(1, Ordering::SeqCst);
            // Reading back inside the listener must not deadlock
            let current = weak.upgrade().unwrap().credentials();
            assert_eq!(&current, creds);
        });

        store.save("t", None);
        store.clear();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
