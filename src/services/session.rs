//! Session manager
//!
//! Owns the authentication lifecycle of the client:
//! - restoring and validating a persisted session on startup
//! - Google OAuth2 login through a caller-supplied redirect handler
//! - periodic and on-demand token refresh
//! - logout
//!
//! The backend's auth store is the single source of credentials. Every
//! change to it is mirrored into one [`AuthSnapshot`] published on a watch
//! channel and into the persisted session cache, under one lock so that
//! observers never see a half-applied change.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::session_cache::SessionCache;
use crate::backend::{AuthStore, BackendError, Credentials, DynBackend, OAuth2CodeExchange};
use crate::config::SessionConfig;
use crate::models::{AuthSnapshot, UserRecord};
use crate::storage::StorageError;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Login or refresh returned no token or no record
    #[error("Authentication response is incomplete")]
    IncompleteAuthResponse,

    #[error("OAuth2 provider '{0}' is not enabled")]
    ProviderUnavailable(String),

    #[error("OAuth2 state does not match the issued state")]
    StateMismatch,

    #[error("OAuth2 redirect failed: {0}")]
    Redirect(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Code and state delivered to the OAuth2 callback route
#[derive(Debug, Clone, PartialEq)]
pub struct OAuth2Callback {
    pub code: String,
    pub state: String,
}

/// Sends the user to the provider and waits for the callback.
#[async_trait]
pub trait OAuth2Redirect: Send + Sync {
    async fn authorize(&self, auth_url: &str) -> Result<OAuth2Callback, SessionError>;
}

/// Session settings taken from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub refresh_interval: Duration,
    pub oauth_redirect_url: String,
    pub oauth_provider: String,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            oauth_redirect_url: config.oauth_redirect_url.clone(),
            oauth_provider: config.oauth_provider.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

struct SessionInner {
    backend: DynBackend,
    cache: SessionCache,
    state: watch::Sender<AuthSnapshot>,
    /// Covers publication and persistence together
    publish_lock: Mutex<()>,
    /// At most one refresh call in flight
    refresh_lock: tokio::sync::Mutex<()>,
    settings: SessionSettings,
}

/// Marks the first initialization as finished when dropped.
struct LoadedGuard<'a>(&'a watch::Sender<AuthSnapshot>);

impl Drop for LoadedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|snapshot| {
            if snapshot.auth_loaded() {
                return false;
            }
            *snapshot = snapshot.loaded();
            true
        });
    }
}

impl SessionInner {
    fn auth_store(&self) -> &AuthStore {
        self.backend.auth_store()
    }

    /// Mirror the auth store into the snapshot and the session cache.
    ///
    /// Must not be called while mutating the auth store: store listeners
    /// call back into this.
    fn sync_from_store(&self) {
        let _guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());

        let Credentials { token, record } = self.auth_store().credentials();
        let user = match record {
            Some(record) if !token.is_empty() => {
                if let Err(e) = self.cache.save(&token, &record) {
                    tracing::error!("Failed to persist session: {}", e);
                }
                Some(record)
            }
            _ => {
                self.cache.clear();
                None
            }
        };

        self.state.send_if_modified(|snapshot| {
            let next = snapshot.with_user(user);
            if *snapshot == next {
                return false;
            }
            *snapshot = next;
            true
        });
    }

    /// Drop every trace of the session.
    fn reset(&self) {
        self.auth_store().clear();
        self.sync_from_store();
    }

    /// Held credentials are usable and the backend still accepts them.
    async fn validate(&self) -> bool {
        let store = self.auth_store();
        if !store.is_valid() {
            return false;
        }
        let Some(user_id) = store.user_id() else {
            return false;
        };

        match self.backend.get_user(&user_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Auth validation failed: {}", e);
                false
            }
        }
    }

    async fn restore(&self) -> Result<(), SessionError> {
        let Some(session) = self.cache.load()? else {
            tracing::info!("No stored session found");
            self.sync_from_store();
            return Ok(());
        };

        tracing::info!("Found stored session, validating");
        self.auth_store()
            .save(session.token.clone(), Some(session.record.clone()));

        if self.validate().await {
            tracing::info!("Session restored for user {}", session.record.id);
            self.sync_from_store();
        } else {
            tracing::warn!("Stored session is no longer valid, clearing it");
            self.reset();
        }
        Ok(())
    }

    /// Refresh the token once; concurrent callers wait their turn.
    async fn refresh_once(&self) -> Result<(), SessionError> {
        let _guard = self.refresh_lock.lock().await;

        let response = self.backend.auth_refresh().await?;
        if response.into_parts().is_none() {
            return Err(SessionError::IncompleteAuthResponse);
        }
        self.sync_from_store();
        Ok(())
    }

    async fn scheduled_refresh(&self) {
        let authenticated = self.state.borrow().is_authenticated();
        if !authenticated {
            return;
        }

        tracing::debug!("Refreshing auth token");
        match self.refresh_once().await {
            Ok(()) => tracing::info!("Auth token refreshed"),
            Err(e) => {
                tracing::error!("Failed to refresh auth token: {}", e);
                if !self.validate().await {
                    tracing::warn!("Token is no longer valid, logging out");
                    self.reset();
                }
            }
        }
    }

    async fn oauth_login(&self, redirect: &dyn OAuth2Redirect) -> Result<UserRecord, SessionError> {
        let wanted = &self.settings.oauth_provider;
        let provider = self
            .backend
            .auth_methods()
            .await?
            .into_iter()
            .find(|p| &p.name == wanted)
            .ok_or_else(|| SessionError::ProviderUnavailable(wanted.clone()))?;

        let auth_url = format!(
            "{}{}",
            provider.auth_url,
            urlencoding::encode(&self.settings.oauth_redirect_url)
        );
        let callback = redirect.authorize(&auth_url).await?;
        if callback.state != provider.state {
            return Err(SessionError::StateMismatch);
        }

        let response = self
            .backend
            .auth_with_oauth2_code(&OAuth2CodeExchange {
                provider: provider.name,
                code: callback.code,
                code_verifier: provider.code_verifier,
                redirect_url: self.settings.oauth_redirect_url.clone(),
                create_data: json!({ "emailVisibility": true }),
            })
            .await?;

        let (_, record) = response
            .into_parts()
            .ok_or(SessionError::IncompleteAuthResponse)?;
        self.sync_from_store();
        Ok(record)
    }
}

/// Authentication session lifecycle.
///
/// Create one per process, call [`SessionManager::initialize`] once at
/// startup, then observe [`SessionManager::subscribe`].
pub struct SessionManager {
    inner: Arc<SessionInner>,
    initialized: OnceCell<()>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(backend: DynBackend, cache: SessionCache, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                backend,
                cache,
                state,
                publish_lock: Mutex::new(()),
                refresh_lock: tokio::sync::Mutex::new(()),
                settings,
            }),
            initialized: OnceCell::new(),
            refresh_task: Mutex::new(None),
        }
    }

    /// Restore the persisted session and start background refresh.
    ///
    /// Only the first call does anything. It never fails: any error leaves
    /// the manager unauthenticated, and `auth_loaded` is set on every path.
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async {
                tracing::info!("Initializing authentication");
                {
                    let _loaded = LoadedGuard(&self.inner.state);
                    if let Err(e) = self.inner.restore().await {
                        tracing::error!("Error during auth initialization: {}", e);
                        self.inner.reset();
                    }
                }
                self.watch_auth_store();
                self.start_refresh_task();
            })
            .await;
    }

    fn watch_auth_store(&self) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner.auth_store().on_change(move |credentials| {
            tracing::debug!(
                "Auth state changed: token={}, record={}",
                !credentials.token.is_empty(),
                credentials.record.is_some()
            );
            if let Some(inner) = weak.upgrade() {
                inner.sync_from_store();
            }
        });
    }

    fn start_refresh_task(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.scheduled_refresh().await;
            }
        });

        let mut slot = self.refresh_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Sign in with the configured OAuth2 provider.
    ///
    /// On failure partial credentials are cleared before the error is
    /// returned. A complete session held at that point is left alone.
    pub async fn authenticate_with_google(
        &self,
        redirect: &dyn OAuth2Redirect,
    ) -> Result<UserRecord, SessionError> {
        tracing::info!("Starting Google authentication");
        match self.inner.oauth_login(redirect).await {
            Ok(user) => {
                tracing::info!("Google authentication successful for user {}", user.id);
                Ok(user)
            }
            Err(e) => {
                tracing::error!("Google authentication error: {}", e);
                // A complete session here belongs to an earlier or concurrent login
                if self.inner.auth_store().credentials().is_complete() {
                    tracing::info!("Keeping the existing session after failed login");
                } else {
                    self.inner.reset();
                }
                Err(e)
            }
        }
    }

    pub fn logout(&self) {
        tracing::info!("Logging out user");
        self.inner.reset();
    }

    /// Non-empty, unexpired token and a user record are held.
    pub fn check_auth_status(&self) -> bool {
        let store = self.inner.auth_store();
        store.is_valid() && store.record().is_some()
    }

    /// Refresh the token now. Returns `true` only on confirmed success.
    pub async fn refresh_auth(&self) -> bool {
        if !self.inner.auth_store().is_valid() {
            return false;
        }

        match self.inner.refresh_once().await {
            Ok(()) => {
                tracing::info!("Manual auth refresh successful");
                true
            }
            Err(e) => {
                tracing::error!("Manual auth refresh failed: {}", e);
                false
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Credential holder shared with the backend client
    pub fn auth_store(&self) -> &AuthStore {
        self.inner.auth_store()
    }

    pub fn cache(&self) -> &SessionCache {
        &self.inner.cache
    }

    /// Stop the background refresh task.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
            tracing::debug!("Token refresh task stopped");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::models::encode_test_token;
    use crate::services::session_cache::{AUTH_STORAGE_KEY, LEGACY_AUTH_STORAGE_KEY};
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        storage: Arc<MemoryStorage>,
        manager: SessionManager,
    }

    fn fixture_with(settings: SessionSettings) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_user(UserRecord::new("u1", "ada@example.com"));
        let storage = Arc::new(MemoryStorage::new());
        let manager = SessionManager::new(
            backend.clone(),
            SessionCache::new(storage.clone()),
            settings,
        );
        Fixture {
            backend,
            storage,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionSettings::default())
    }

    fn persist(f: &Fixture, token: &str) {
        f.manager
            .cache()
            .save(token, &UserRecord::new("u1", "ada@example.com"))
            .unwrap();
    }

    fn assert_consistent(snapshot: &AuthSnapshot) {
        if snapshot.is_authenticated() {
            assert!(snapshot.current_user().is_some());
        }
    }

    /// Redirect handler that answers with a fixed code and echoes the state
    /// embedded in the authorization URL.
    struct EchoRedirect {
        tamper_state: bool,
    }

    #[async_trait]
    impl OAuth2Redirect for EchoRedirect {
        async fn authorize(&self, auth_url: &str) -> Result<OAuth2Callback, SessionError> {
            let url = url::Url::parse(auth_url).unwrap();
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.to_string())
                .unwrap();
            assert!(auth_url.ends_with(&*urlencoding::encode("http://127.0.0.1:5174/auth/callback")));
            Ok(OAuth2Callback {
                code: "code".to_string(),
                state: if self.tamper_state {
                    "forged".to_string()
                } else {
                    state
                },
            })
        }
    }

    #[tokio::test]
    async fn test_initialize_without_stored_session() {
        let f = fixture();
        let mut rx = f.manager.subscribe();
        assert!(!rx.borrow_and_update().auth_loaded());

        f.manager.initialize().await;

        let snapshot = f.manager.snapshot();
        assert!(snapshot.auth_loaded());
        assert!(!snapshot.is_authenticated());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_initialize_restores_valid_session() {
        let f = fixture();
        let token = f.backend.issue_token("u1");
        persist(&f, &token);

        f.manager.initialize().await;

        let snapshot = f.manager.snapshot();
        assert!(snapshot.auth_loaded());
        assert!(snapshot.is_authenticated());
        assert_eq!(snapshot.current_user().unwrap().email, "ada@example.com");
        assert!(f.manager.check_auth_status());
    }

    #[tokio::test]
    async fn test_initialize_discards_expired_session() {
        let f = fixture();
        let expired = encode_test_token(json!({"id": "u1", "exp": Utc::now().timestamp() - 60}));
        persist(&f, &expired);

        f.manager.initialize().await;

        assert!(f.manager.snapshot().auth_loaded());
        assert!(!f.manager.snapshot().is_authenticated());
        assert!(f.storage.get(AUTH_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_clears_session_rejected_by_backend() {
        let f = fixture();
        let token = f.backend.issue_token("u1");
        f.backend.revoke_token(&token);
        persist(&f, &token);

        f.manager.initialize().await;

        assert!(!f.manager.snapshot().is_authenticated());
        assert!(f.manager.auth_store().token().is_empty());
        assert!(f.storage.get(AUTH_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let f = fixture();
        f.manager.initialize().await;

        let token = f.backend.issue_token("u1");
        persist(&f, &token);
        f.manager.initialize().await;

        assert!(!f.manager.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_auth_store_changes_are_published_and_persisted() {
        let f = fixture();
        f.manager.initialize().await;
        let mut rx = f.manager.subscribe();

        let token = f.backend.issue_token("u1");
        f.manager
            .auth_store()
            .save(token.clone(), Some(UserRecord::new("u1", "ada@example.com")));

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert!(snapshot.is_authenticated());
        assert_consistent(&snapshot);
        let session = f.manager.cache().load().unwrap().unwrap();
        assert_eq!(session.token, token);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let f = fixture();
        persist(&f, &f.backend.issue_token("u1"));
        f.storage.set(LEGACY_AUTH_STORAGE_KEY, "{}").unwrap();
        f.manager.initialize().await;
        assert!(f.manager.check_auth_status());

        f.manager.logout();

        assert!(!f.manager.check_auth_status());
        assert!(!f.manager.snapshot().is_authenticated());
        assert!(f.manager.snapshot().auth_loaded());
        assert!(f.storage.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_auth() {
        let f = fixture();
        assert!(!f.manager.refresh_auth().await);

        persist(&f, &f.backend.issue_token("u1"));
        f.manager.initialize().await;
        let before = f.manager.auth_store().token();

        assert!(f.manager.refresh_auth().await);
        let after = f.manager.auth_store().token();
        assert_ne!(before, after);
        assert_eq!(f.manager.cache().load().unwrap().unwrap().token, after);

        f.backend.set_refresh_failure(true);
        assert!(!f.manager.refresh_auth().await);
        assert!(f.manager.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_google_login_success() {
        let f = fixture();
        f.manager.initialize().await;
        f.backend.set_oauth_user(Some("u1"));

        let user = f
            .manager
            .authenticate_with_google(&EchoRedirect { tamper_state: false })
            .await
            .unwrap();

        assert_eq!(user.id, "u1");
        assert!(f.manager.snapshot().is_authenticated());
        assert!(f.manager.cache().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_google_login_state_mismatch_clears_session() {
        let f = fixture();
        f.manager.initialize().await;
        f.backend.set_oauth_user(Some("u1"));

        let err = f
            .manager
            .authenticate_with_google(&EchoRedirect { tamper_state: true })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::StateMismatch));
        assert!(!f.manager.snapshot().is_authenticated());
        assert!(f.storage.get(AUTH_STORAGE_KEY).unwrap().is_none());
    }

    /// Redirect handler whose user never comes back.
    struct AbandonedRedirect {
        after: Duration,
    }

    #[async_trait]
    impl OAuth2Redirect for AbandonedRedirect {
        async fn authorize(&self, _auth_url: &str) -> Result<OAuth2Callback, SessionError> {
            tokio::time::sleep(self.after).await;
            Err(SessionError::Redirect("timed out waiting for the provider".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_login_keeps_later_session() {
        let f = fixture();
        f.manager.initialize().await;
        f.backend.set_oauth_user(Some("u1"));

        let never_returns = AbandonedRedirect {
            after: Duration::from_secs(300),
        };
        let completes = EchoRedirect { tamper_state: false };

        let abandoned = f.manager.authenticate_with_google(&never_returns);
        let completed = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            f.manager.authenticate_with_google(&completes).await
        };
        let (abandoned, completed) = tokio::join!(abandoned, completed);

        assert!(matches!(abandoned, Err(SessionError::Redirect(_))));
        assert_eq!(completed.unwrap().id, "u1");
        assert!(f.manager.check_auth_status());
        assert!(f.manager.snapshot().is_authenticated());
        assert!(f.storage.get(AUTH_STORAGE_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_login_clears_partial_credentials() {
        let f = fixture();
        f.manager.initialize().await;
        f.manager.auth_store().save(f.backend.issue_token("u1"), None);

        let err = f
            .manager
            .authenticate_with_google(&AbandonedRedirect {
                after: Duration::ZERO,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Redirect(_)));
        assert!(f.manager.auth_store().token().is_empty());
        assert!(!f.manager.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_google_login_unknown_provider() {
        let f = fixture_with(SessionSettings {
            oauth_provider: "github".to_string(),
            ..SessionSettings::default()
        });

        let err = f
            .manager
            .authenticate_with_google(&EchoRedirect { tamper_state: false })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::ProviderUnavailable(name) if name == "github"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_rotates_token() {
        let f = fixture_with(SessionSettings {
            refresh_interval: Duration::from_secs(60),
            ..SessionSettings::default()
        });
        persist(&f, &f.backend.issue_token("u1"));
        f.manager.initialize().await;
        let before = f.manager.auth_store().token();

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_ne!(f.manager.auth_store().token(), before);
        assert!(f.manager.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_logs_out_revoked_session() {
        let f = fixture_with(SessionSettings {
            refresh_interval: Duration::from_secs(60),
            ..SessionSettings::default()
        });
        persist(&f, &f.backend.issue_token("u1"));
        f.manager.initialize().await;
        let mut rx = f.manager.subscribe();

        f.backend.revoke_user_tokens("u1");
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(!f.manager.snapshot().is_authenticated());
        assert!(rx.has_changed().unwrap());
        assert_consistent(&rx.borrow_and_update());
        assert!(f.storage.get(AUTH_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_failure_keeps_valid_session() {
        let f = fixture_with(SessionSettings {
            refresh_interval: Duration::from_secs(60),
            ..SessionSettings::default()
        });
        persist(&f, &f.backend.issue_token("u1"));
        f.manager.initialize().await;
        f.backend.set_refresh_failure(true);

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(f.manager.snapshot().is_authenticated());
    }

    #[derive(Debug, Clone, Copy)]
    enum SessionOp {
        Initialize,
        Login,
        Logout,
        Refresh,
        Revoke,
        FailRefreshes(bool),
    }

    fn session_op() -> impl Strategy<Value = SessionOp> {
        prop_oneof![
            Just(SessionOp::Initialize),
            Just(SessionOp::Login),
            Just(SessionOp::Logout),
            Just(SessionOp::Refresh),
            Just(SessionOp::Revoke),
            any::<bool>().prop_map(SessionOp::FailRefreshes),
        ]
    }

    async fn apply(f: &Fixture, op: SessionOp) {
        match op {
            SessionOp::Initialize => f.manager.initialize().await,
            SessionOp::Login => {
                let _ = f
                    .manager
                    .authenticate_with_google(&EchoRedirect { tamper_state: false })
                    .await;
            }
            SessionOp::Logout => f.manager.logout(),
            SessionOp::Refresh => {
                f.manager.refresh_auth().await;
            }
            SessionOp::Revoke => f.backend.revoke_user_tokens("u1"),
            SessionOp::FailRefreshes(fail) => f.backend.set_refresh_failure(fail),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn session_snapshot_stays_consistent(ops in prop::collection::vec(session_op(), 1..16)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let f = fixture();
                f.backend.set_oauth_user(Some("u1"));
                let mut was_loaded = false;

                for op in ops {
                    apply(&f, op).await;

                    let snapshot = f.manager.snapshot();
                    let credentials = f.manager.auth_store().credentials();
                    let persisted = f.storage.get(AUTH_STORAGE_KEY).unwrap();

                    assert_consistent(&snapshot);
                    assert_eq!(snapshot.is_authenticated(), credentials.is_complete(), "after {:?}", op);
                    assert_eq!(persisted.is_some(), snapshot.is_authenticated(), "after {:?}", op);
                    assert!(!was_loaded || snapshot.auth_loaded(), "auth_loaded reverted after {:?}", op);
                    was_loaded = snapshot.auth_loaded();
                }
            });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_refresh() {
        let f = fixture_with(SessionSettings {
            refresh_interval: Duration::from_secs(60),
            ..SessionSettings::default()
        });
        persist(&f, &f.backend.issue_token("u1"));
        f.manager.initialize().await;
        let before = f.manager.auth_store().token();

        f.manager.shutdown();
        tokio::time::sleep(Duration::from_secs(180)).await;

        assert_eq!(f.manager.auth_store().token(), before);
    }
}
