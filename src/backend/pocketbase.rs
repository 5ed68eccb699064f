//! PocketBase HTTP driver
//!
//! Talks to the records API of the `users` and `links` collections. Requests
//! carry the auth store token in the `Authorization` header; auth endpoints
//! write their result back into the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::realtime::{self, RealtimeTarget};
use super::{
    AuthBackend, AuthProvider, AuthResponse, AuthStore, BackendError, LinkCollection, ListQuery,
    ListResult, OAuth2CodeExchange, RecordEvent,
};
use crate::models::{Link, LinkInput, UserRecord};

const USERS: &str = "users";
const LINKS: &str = "links";

pub struct PocketBase {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    auth: Arc<AuthStore>,
}

impl std::fmt::Debug for PocketBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketBase")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Error body returned by the records API
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl PocketBase {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            auth: Arc::new(AuthStore::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_path(collection: &str) -> String {
        format!("/api/collections/{}/records", collection)
    }

    fn record_path(collection: &str, id: &str) -> String {
        format!(
            "/api/collections/{}/records/{}",
            collection,
            urlencoding::encode(id)
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        let token = self.auth.token();
        if token.is_empty() {
            builder
        } else {
            builder.header(reqwest::header::AUTHORIZATION, token)
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = check_status(builder.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Store complete auth results the way the SDK's auth store does.
    fn remember(&self, response: &AuthResponse) {
        if let (Some(token), Some(record)) = (&response.token, &response.record) {
            if !token.is_empty() {
                self.auth.save(token.clone(), Some(record.clone()));
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let message = if body.message.is_empty() {
        status.canonical_reason().unwrap_or("Request failed").to_string()
    } else {
        body.message
    };

    tracing::debug!("Backend {} returned {}: {}", url, status, message);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::NOT_FOUND => BackendError::NotFound(url),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

/// Providers from either the current (`oauth2.providers`) or the older
/// (`authProviders`) auth-methods response shape.
fn providers_from(value: Value) -> Result<Vec<AuthProvider>, BackendError> {
    let providers = value
        .pointer("/oauth2/providers")
        .or_else(|| value.get("authProviders"))
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(providers).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl AuthBackend for PocketBase {
    fn auth_store(&self) -> &AuthStore {
        &self.auth
    }

    async fn get_user(&self, id: &str) -> Result<UserRecord, BackendError> {
        self.send(self.request(Method::GET, &Self::record_path(USERS, id)))
            .await
    }

    async fn auth_refresh(&self) -> Result<AuthResponse, BackendError> {
        let response: AuthResponse = self
            .send(self.request(
                Method::POST,
                &format!("/api/collections/{}/auth-refresh", USERS),
            ))
            .await?;
        self.remember(&response);
        Ok(response)
    }

    async fn auth_methods(&self) -> Result<Vec<AuthProvider>, BackendError> {
        let value: Value = self
            .send(self.request(
                Method::GET,
                &format!("/api/collections/{}/auth-methods", USERS),
            ))
            .await?;
        providers_from(value)
    }

    async fn auth_with_oauth2_code(
        &self,
        exchange: &OAuth2CodeExchange,
    ) -> Result<AuthResponse, BackendError> {
        let response: AuthResponse = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/api/collections/{}/auth-with-oauth2", USERS),
                )
                .json(exchange),
            )
            .await?;
        self.remember(&response);
        Ok(response)
    }
}

#[async_trait]
impl LinkCollection for PocketBase {
    async fn list_links(&self, query: &ListQuery) -> Result<ListResult<Link>, BackendError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("perPage", query.per_page.to_string()),
        ];
        if let Some(filter) = &query.filter {
            params.push(("filter", filter.render()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }

        self.send(
            self.request(Method::GET, &Self::records_path(LINKS))
                .query(&params),
        )
        .await
    }

    async fn get_link(&self, id: &str) -> Result<Link, BackendError> {
        self.send(self.request(Method::GET, &Self::record_path(LINKS, id)))
            .await
    }

    async fn create_link(&self, input: &LinkInput) -> Result<Link, BackendError> {
        self.send(
            self.request(Method::POST, &Self::records_path(LINKS))
                .json(input),
        )
        .await
    }

    async fn update_link(&self, id: &str, input: &LinkInput) -> Result<Link, BackendError> {
        self.send(
            self.request(Method::PATCH, &Self::record_path(LINKS, id))
                .json(input),
        )
        .await
    }

    async fn delete_link(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, &Self::record_path(LINKS, id))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn subscribe_links(&self) -> Result<broadcast::Receiver<RecordEvent>, BackendError> {
        realtime::subscribe(RealtimeTarget {
            http: self.http.clone(),
            stream_http: self.stream_http.clone(),
            base_url: self.base_url.clone(),
            auth: self.auth.clone(),
            topic: LINKS.to_string(),
            connect_timeout: self.timeout,
        })
        .await
    }
}
