//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error type returned by every endpoint
//! - Session requirement middleware for owner-scoped routes

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::PendingOAuth;
use crate::backend::BackendError;
use crate::services::{
    DebugConsole, LinkService, LinkServiceError, MetadataFetcher, SessionError, SessionManager,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub links: Arc<LinkService>,
    pub metadata: Arc<dyn MetadataFetcher>,
    /// Present only when the debug console is enabled
    pub debug: Option<Arc<DebugConsole>>,
    pub oauth: Arc<PendingOAuth>,
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    /// The backend or another remote service failed
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new("BAD_GATEWAY", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "BAD_GATEWAY" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthorized { message, .. } => ApiError::unauthorized(message),
            BackendError::NotFound(what) => ApiError::not_found(format!("Not found: {}", what)),
            BackendError::Status { status: 400, message } => ApiError::validation_error(message),
            other => ApiError::bad_gateway(other.to_string()),
        }
    }
}

impl From<LinkServiceError> for ApiError {
    fn from(e: LinkServiceError) -> Self {
        match e {
            LinkServiceError::Unauthenticated => ApiError::unauthorized("User not authenticated"),
            LinkServiceError::Validation(message) => ApiError::validation_error(message),
            LinkServiceError::Backend(e) => e.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Backend(e) => e.into(),
            SessionError::StateMismatch | SessionError::Redirect(_) => {
                ApiError::validation_error(e.to_string())
            }
            SessionError::IncompleteAuthResponse | SessionError::ProviderUnavailable(_) => {
                ApiError::bad_gateway(e.to_string())
            }
            SessionError::Storage(_) => ApiError::internal_error(e.to_string()),
        }
    }
}

/// Reject requests unless a usable session is held
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.session.check_auth_status() {
        return Err(ApiError::unauthorized("User not authenticated"));
    }
    Ok(next.run(request).await)
}
