//! Backend access
//!
//! Typed access to the remote collection store that owns users and links.
//! This module provides:
//! - `AuthBackend` and `LinkCollection` traits defining what the services need
//! - `PocketBase`, the HTTP implementation against a PocketBase server
//! - `MemoryBackend`, an in-process implementation for offline use and tests
//!
//! The driver is selected based on configuration.

pub mod auth_store;
pub mod filter;
pub mod memory;
pub mod pocketbase;
mod realtime;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::{BackendConfig, BackendDriver};
use crate::models::{Link, LinkInput, UserRecord};

pub use auth_store::{AuthStore, Credentials};
pub use filter::Filter;
pub use memory::MemoryBackend;
pub use pocketbase::PocketBase;

/// Largest page the services ever request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Backend rejected request ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Backend transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid backend response: {0}")]
    Decode(String),
    #[error("Realtime subscription failed: {0}")]
    Realtime(String),
}

impl BackendError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        BackendError::Unauthorized {
            status: 401,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// Parameters of a record list call
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub per_page: u32,
    pub filter: Option<Filter>,
    /// Comma-separated fields, `-` prefix for descending
    pub sort: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: MAX_PAGE_SIZE,
            filter: None,
            sort: None,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.sort = Some("-created".to_string());
        self
    }
}

/// One page of records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

/// Token and record returned by auth endpoints.
///
/// Both fields are optional so callers can detect incomplete responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub record: Option<UserRecord>,
}

impl AuthResponse {
    /// Token and record, when both are present and the token is non-empty
    pub fn into_parts(self) -> Option<(String, UserRecord)> {
        match (self.token, self.record) {
            (Some(token), Some(record)) if !token.is_empty() => Some((token, record)),
            _ => None,
        }
    }
}

/// OAuth2 provider as advertised by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProvider {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub state: String,
    /// Authorization URL; the redirect URL is appended to it
    #[serde(rename = "authURL", alias = "authUrl")]
    pub auth_url: String,
    #[serde(default)]
    pub code_verifier: String,
}

/// Authorization code exchange request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2CodeExchange {
    pub provider: String,
    pub code: String,
    pub code_verifier: String,
    pub redirect_url: String,
    pub create_data: serde_json::Value,
}

/// Change notification for a collection record
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordEvent {
    /// `create`, `update` or `delete`
    pub action: String,
    #[serde(default, deserialize_with = "record_id")]
    pub record: String,
}

fn record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(id) => id,
        serde_json::Value::Object(map) => map
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    })
}

/// Auth operations against the `users` collection
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Credential holder used to authorize every request
    fn auth_store(&self) -> &AuthStore;

    /// Fetch a user record by ID with the current credentials
    async fn get_user(&self, id: &str) -> Result<UserRecord, BackendError>;

    /// Exchange the current token for a fresh one; saves it in the auth store
    async fn auth_refresh(&self) -> Result<AuthResponse, BackendError>;

    /// List the OAuth2 providers enabled for the collection
    async fn auth_methods(&self) -> Result<Vec<AuthProvider>, BackendError>;

    /// Complete an OAuth2 login; saves the result in the auth store
    async fn auth_with_oauth2_code(
        &self,
        exchange: &OAuth2CodeExchange,
    ) -> Result<AuthResponse, BackendError>;
}

/// CRUD and change notifications for the `links` collection
#[async_trait]
pub trait LinkCollection: Send + Sync {
    async fn list_links(&self, query: &ListQuery) -> Result<ListResult<Link>, BackendError>;

    async fn get_link(&self, id: &str) -> Result<Link, BackendError>;

    async fn create_link(&self, input: &LinkInput) -> Result<Link, BackendError>;

    async fn update_link(&self, id: &str, input: &LinkInput) -> Result<Link, BackendError>;

    async fn delete_link(&self, id: &str) -> Result<(), BackendError>;

    /// Receive an event for every change to any link record
    async fn subscribe_links(&self) -> Result<broadcast::Receiver<RecordEvent>, BackendError>;
}

/// Everything the services need from the backend
pub trait Backend: AuthBackend + LinkCollection {}

impl<T: AuthBackend + LinkCollection> Backend for T {}

pub type DynBackend = Arc<dyn Backend>;

/// Create a backend client based on configuration
pub fn create_backend(config: &BackendConfig) -> Result<DynBackend, BackendError> {
    match config.driver {
        BackendDriver::Pocketbase => {
            tracing::info!("Using PocketBase backend at {}", config.url);
            Ok(Arc::new(PocketBase::new(&config.url, config.timeout())?))
        }
        BackendDriver::Memory => {
            tracing::info!("Using in-memory backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_response_requires_both_parts() {
        let complete: AuthResponse =
            serde_json::from_value(json!({"token": "t", "record": {"id": "u1"}})).unwrap();
        assert!(complete.into_parts().is_some());

        let missing_record: AuthResponse = serde_json::from_value(json!({"token": "t"})).unwrap();
        assert!(missing_record.into_parts().is_none());

        let empty_token: AuthResponse =
            serde_json::from_value(json!({"token": "", "record": {"id": "u1"}})).unwrap();
        assert!(empty_token.into_parts().is_none());
    }

    #[test]
    fn test_record_event_accepts_full_record() {
        let event: RecordEvent =
            serde_json::from_value(json!({"action": "update", "record": {"id": "l1", "url": "x"}}))
                .unwrap();

        assert_eq!(event.action, "update");
        assert_eq!(event.record, "l1");
    }

    #[test]
    fn test_list_query_defaults() {
        let query = ListQuery::filtered(Filter::eq("user", "u1")).newest_first();

        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, MAX_PAGE_SIZE);
        assert_eq!(query.sort.as_deref(), Some("-created"));
    }
}
