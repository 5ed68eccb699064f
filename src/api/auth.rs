//! Authentication API endpoints
//!
//! Handles HTTP requests for the session lifecycle:
//! - GET /api/auth/status - Current session snapshot
//! - GET /api/auth/google - Start a Google login, returns the URL to open
//! - GET /auth/callback - OAuth2 provider redirect target
//! - POST /api/auth/refresh - Refresh the token now
//! - POST /api/auth/logout - Drop the session

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

use crate::api::middleware::{ApiError, AppState};
use crate::models::AuthSnapshot;
use crate::services::{OAuth2Callback, OAuth2Redirect, SessionError};

/// How long a started login waits for the provider callback
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

type CallbackResult = Result<OAuth2Callback, String>;

/// Logins waiting for their provider callback, keyed by OAuth2 state
pub struct PendingOAuth {
    waiting: Mutex<HashMap<String, oneshot::Sender<CallbackResult>>>,
    timeout: Duration,
}

impl Default for PendingOAuth {
    fn default() -> Self {
        Self::new(DEFAULT_CALLBACK_TIMEOUT)
    }
}

impl PendingOAuth {
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Park a login until its callback arrives.
    ///
    /// Logins still waiting are superseded and fail right away.
    fn register(&self, state: &str) -> oneshot::Receiver<CallbackResult> {
        let (tx, rx) = oneshot::channel();
        let superseded: Vec<_> = {
            let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
            let previous = waiting.drain().map(|(_, sender)| sender).collect();
            waiting.insert(state.to_string(), tx);
            previous
        };
        for sender in superseded {
            let _ = sender.send(Err("superseded by a newer login".to_string()));
        }
        rx
    }

    fn forget(&self, state: &str) {
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(state);
    }

    /// Hand a callback to the login waiting for `state`.
    ///
    /// Returns false when no login is waiting for it.
    pub fn complete(&self, state: &str, result: CallbackResult) -> bool {
        let waiting = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(state);
        match waiting {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// Redirect handler that publishes the authorization URL to the HTTP caller
/// and waits for `/auth/callback`.
struct CallbackRedirect {
    pending: Arc<PendingOAuth>,
    auth_url: Mutex<Option<oneshot::Sender<String>>>,
}

fn state_of(auth_url: &str) -> Option<String> {
    Url::parse(auth_url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
}

#[async_trait]
impl OAuth2Redirect for CallbackRedirect {
    async fn authorize(&self, auth_url: &str) -> Result<OAuth2Callback, SessionError> {
        let state = state_of(auth_url)
            .ok_or_else(|| SessionError::Redirect("authorization URL has no state".to_string()))?;
        let callback = self.pending.register(&state);

        let sender = self.auth_url.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            if sender.send(auth_url.to_string()).is_err() {
                self.pending.forget(&state);
                return Err(SessionError::Redirect("login request was abandoned".to_string()));
            }
        }

        let outcome = tokio::time::timeout(self.pending.timeout, callback).await;
        self.pending.forget(&state);
        match outcome {
            Ok(Ok(Ok(callback))) => Ok(callback),
            Ok(Ok(Err(provider_error))) => Err(SessionError::Redirect(provider_error)),
            Ok(Err(_)) => Err(SessionError::Redirect("login was cancelled".to_string())),
            Err(_) => Err(SessionError::Redirect("timed out waiting for the provider".to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLoginResponse {
    pub auth_url: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Build the auth router (mounted under /api/auth)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/google", get(start_google_login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// GET /api/auth/status - Current session snapshot
async fn status(State(state): State<AppState>) -> Json<AuthSnapshot> {
    Json(state.session.snapshot())
}

/// GET /api/auth/google - Start a Google login
///
/// The login continues in the background until the provider redirects to
/// /auth/callback or the wait times out.
async fn start_google_login(
    State(state): State<AppState>,
) -> Result<Json<StartLoginResponse>, ApiError> {
    let (url_tx, url_rx) = oneshot::channel();
    let redirect = CallbackRedirect {
        pending: state.oauth.clone(),
        auth_url: Mutex::new(Some(url_tx)),
    };

    let (result_tx, result_rx) = oneshot::channel();
    let session = state.session.clone();
    tokio::spawn(async move {
        let result = session.authenticate_with_google(&redirect).await;
        // Nobody listens once the URL has been handed out
        let _ = result_tx.send(result);
    });

    // A login that fails early reports its own error rather than the dropped URL sender
    tokio::select! {
        biased;
        result = result_rx => match result {
            Ok(Err(e)) => Err(e.into()),
            _ => Err(ApiError::internal_error("Login ended before producing a URL")),
        },
        auth_url = url_rx => match auth_url {
            Ok(auth_url) => Ok(Json(StartLoginResponse { auth_url })),
            Err(_) => Err(ApiError::internal_error("Login ended before producing a URL")),
        },
    }
}

/// GET /auth/callback - Provider redirect target
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let oauth_state = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation_error("Missing state"))?;

    let result = match (query.error, query.code) {
        (Some(error), _) => Err(error),
        (None, Some(code)) if !code.is_empty() => Ok(OAuth2Callback {
            code,
            state: oauth_state.clone(),
        }),
        _ => return Err(ApiError::validation_error("Missing code")),
    };

    if !state.oauth.complete(&oauth_state, result) {
        return Err(ApiError::validation_error("No login is waiting for this state"));
    }

    Ok(Html(
        "<!doctype html><title>LinkSync</title><p>Login received. You can close this window.</p>",
    ))
}

/// POST /api/auth/refresh - Refresh the token now
async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    Json(RefreshResponse {
        refreshed: state.session.refresh_auth().await,
    })
}

/// POST /api/auth/logout - Drop the session
async fn logout(State(state): State<AppState>) -> StatusCode {
    state.session.logout();
    StatusCode::NO_CONTENT
}
