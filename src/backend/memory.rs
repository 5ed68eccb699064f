//! In-memory backend driver
//!
//! Keeps users, tokens and links in process memory and enforces the same
//! access rules the PocketBase collections are configured with:
//! - links are listed and viewed when public or owned by the caller
//! - links are created, updated and deleted by their owner only
//! - a user record is visible to that user only
//!
//! Tokens are JWT-shaped so expiry claims behave as they do remotely.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use serde_json::json;
use tokio::sync::broadcast;

use super::{
    AuthBackend, AuthProvider, AuthResponse, AuthStore, BackendError, LinkCollection, ListQuery,
    ListResult, OAuth2CodeExchange, RecordEvent,
};
use crate::models::{token_expired_at, Link, LinkInput, UserRecord};

const EVENT_CAPACITY: usize = 64;
const DEFAULT_TOKEN_TTL_DAYS: i64 = 14;
/// Unfinished OAuth2 logins kept at most this long
const OAUTH_STATE_TTL_MINUTES: i64 = 10;
const MAX_PENDING_OAUTH_STATES: usize = 64;

#[derive(Debug, Clone)]
struct IssuedOAuthState {
    code_verifier: String,
    issued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MemoryState {
    users: HashMap<String, UserRecord>,
    /// token -> user ID
    tokens: HashMap<String, String>,
    /// Insertion order
    links: Vec<Link>,
    /// Issued OAuth2 state -> code verifier
    oauth_states: HashMap<String, IssuedOAuthState>,
    /// User returned by a successful OAuth2 exchange
    oauth_user: Option<String>,
    refresh_fails: bool,
    token_ttl: Duration,
}

impl MemoryState {
    /// Forget expired OAuth2 states, then the oldest ones beyond the cap.
    fn prune_oauth_states(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(OAUTH_STATE_TTL_MINUTES);
        self.oauth_states.retain(|_, issued| issued.issued_at > cutoff);

        while self.oauth_states.len() > MAX_PENDING_OAUTH_STATES {
            let oldest = self
                .oauth_states
                .iter()
                .min_by_key(|(_, issued)| issued.issued_at)
                .map(|(state, _)| state.clone());
            match oldest {
                Some(state) => {
                    self.oauth_states.remove(&state);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            tokens: HashMap::new(),
            links: Vec::new(),
            oauth_states: HashMap::new(),
            oauth_user: None,
            refresh_fails: false,
            token_ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    auth: AuthStore,
    state: RwLock<MemoryState>,
    events: broadcast::Sender<RecordEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            auth: AuthStore::new(),
            state: RwLock::new(MemoryState::default()),
            events,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace a user record.
    pub fn insert_user(&self, user: UserRecord) {
        self.write().users.insert(user.id.clone(), user);
    }

    /// Mint a token for `user_id` valid for the configured lifetime.
    pub fn issue_token(&self, user_id: &str) -> String {
        let ttl = self.read().token_ttl;
        self.issue_token_with_expiry(user_id, Utc::now() + ttl)
    }

    /// Mint a token for `user_id` carrying the given `exp` claim.
    pub fn issue_token_with_expiry(&self, user_id: &str, expires_at: DateTime<Utc>) -> String {
        let token = mint_token(user_id, expires_at);
        self.write()
            .tokens
            .insert(token.clone(), user_id.to_string());
        token
    }

    /// Invalidate a token server-side.
    pub fn revoke_token(&self, token: &str) {
        self.write().tokens.remove(token);
    }

    /// Invalidate every token of a user.
    pub fn revoke_user_tokens(&self, user_id: &str) {
        self.write().tokens.retain(|_, owner| owner != user_id);
    }

    /// Choose the account a completed OAuth2 login resolves to.
    pub fn set_oauth_user(&self, user_id: Option<&str>) {
        self.write().oauth_user = user_id.map(ToString::to_string);
    }

    /// Make every `auth_refresh` call fail with a server error.
    pub fn set_refresh_failure(&self, fails: bool) {
        self.write().refresh_fails = fails;
    }

    /// Store a link directly, bypassing access rules.
    ///
    /// Missing ID and timestamps are filled in.
    pub fn insert_link(&self, mut link: Link) -> Link {
        if link.id.is_empty() {
            link.id = new_record_id();
        }
        let now = timestamp();
        link.created.get_or_insert_with(|| now.clone());
        link.updated.get_or_insert(now);
        self.write().links.push(link.clone());
        self.emit("create", &link.id);
        link
    }

    /// All stored links in insertion order.
    pub fn links(&self) -> Vec<Link> {
        self.read().links.clone()
    }

    fn emit(&self, action: &str, id: &str) {
        // No receivers is fine
        let _ = self.events.send(RecordEvent {
            action: action.to_string(),
            record: id.to_string(),
        });
    }

    /// User the current auth store token resolves to.
    fn caller(&self) -> Option<UserRecord> {
        let token = self.auth.token();
        if token.is_empty() || token_expired_at(&token, Utc::now()) {
            return None;
        }
        let state = self.read();
        let user_id = state.tokens.get(&token)?;
        state.users.get(user_id).cloned()
    }

    fn caller_id(&self) -> Option<String> {
        self.caller().map(|user| user.id)
    }

    fn save_auth(&self, user: UserRecord) -> AuthResponse {
        let token = self.issue_token(&user.id);
        self.auth.save(token.clone(), Some(user.clone()));
        AuthResponse {
            token: Some(token),
            record: Some(user),
        }
    }
}

fn can_view(link: &Link, caller: Option<&str>) -> bool {
    link.is_public() || caller == Some(link.user.as_str())
}

fn mint_token(user_id: &str, expires_at: DateTime<Utc>) -> String {
    let header = BASE64URL_NOPAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({
        "id": user_id,
        "type": "auth",
        "exp": expires_at.timestamp(),
        "jti": uuid::Uuid::new_v4().simple().to_string(),
    });
    let payload = BASE64URL_NOPAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.memory", header, payload)
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..15].to_string()
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ").to_string()
}

fn bad_request(message: &str) -> BackendError {
    BackendError::Status {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    fn auth_store(&self) -> &AuthStore {
        &self.auth
    }

    async fn get_user(&self, id: &str) -> Result<UserRecord, BackendError> {
        match self.caller() {
            Some(user) if user.id == id => Ok(user),
            _ => Err(BackendError::NotFound(format!("users/{}", id))),
        }
    }

    async fn auth_refresh(&self) -> Result<AuthResponse, BackendError> {
        if self.read().refresh_fails {
            return Err(BackendError::Status {
                status: 500,
                message: "Failed to refresh record auth.".to_string(),
            });
        }
        let user = self
            .caller()
            .ok_or_else(|| BackendError::unauthorized("The request requires valid record authorization token."))?;
        Ok(self.save_auth(user))
    }

    async fn auth_methods(&self) -> Result<Vec<AuthProvider>, BackendError> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let code_verifier = uuid::Uuid::new_v4().simple().to_string();
        {
            let mut memory = self.write();
            let now = Utc::now();
            memory.oauth_states.insert(
                state.clone(),
                IssuedOAuthState {
                    code_verifier: code_verifier.clone(),
                    issued_at: now,
                },
            );
            memory.prune_oauth_states(now);
        }

        Ok(vec![AuthProvider {
            name: "google".to_string(),
            display_name: "Google".to_string(),
            auth_url: format!(
                "https://accounts.google.com/o/oauth2/auth?client_id=memory&state={}&redirect_uri=",
                state
            ),
            state,
            code_verifier,
        }])
    }

    async fn auth_with_oauth2_code(
        &self,
        exchange: &OAuth2CodeExchange,
    ) -> Result<AuthResponse, BackendError> {
        let user = {
            let mut state = self.write();
            state.prune_oauth_states(Utc::now());
            let known = state
                .oauth_states
                .iter()
                .find(|(_, issued)| issued.code_verifier == exchange.code_verifier)
                .map(|(issued, _)| issued.clone());
            let Some(issued) = known else {
                return Err(bad_request("Failed to authenticate."));
            };
            state.oauth_states.remove(&issued);

            if exchange.code.is_empty() {
                return Err(bad_request("Failed to authenticate."));
            }
            state
                .oauth_user
                .as_ref()
                .and_then(|id| state.users.get(id))
                .cloned()
                .ok_or_else(|| bad_request("Failed to authenticate."))?
        };
        Ok(self.save_auth(user))
    }
}

#[async_trait]
impl LinkCollection for MemoryBackend {
    async fn list_links(&self, query: &ListQuery) -> Result<ListResult<Link>, BackendError> {
        let caller = self.caller_id();
        let mut matched: Vec<Link> = self
            .read()
            .links
            .iter()
            .filter(|link| can_view(link, caller.as_deref()))
            .filter(|link| match &query.filter {
                Some(filter) => serde_json::to_value(link)
                    .map(|value| filter.matches(&value))
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect();

        match query.sort.as_deref() {
            Some("-created") => {
                // Later inserts first when timestamps tie
                matched.reverse();
                matched.sort_by(|a, b| b.created.cmp(&a.created));
            }
            Some("created") => matched.sort_by(|a, b| a.created.cmp(&b.created)),
            _ => {}
        }

        let per_page = query.per_page.max(1);
        let page = query.page.max(1);
        let total_items = matched.len() as i64;
        let total_pages = (total_items + per_page as i64 - 1) / per_page as i64;
        let items = matched
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .collect();

        Ok(ListResult {
            page,
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    async fn get_link(&self, id: &str) -> Result<Link, BackendError> {
        let caller = self.caller_id();
        self.read()
            .links
            .iter()
            .find(|link| link.id == id && can_view(link, caller.as_deref()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("links/{}", id)))
    }

    async fn create_link(&self, input: &LinkInput) -> Result<Link, BackendError> {
        let caller = self
            .caller_id()
            .ok_or_else(|| bad_request("Failed to create record."))?;
        if input.user.as_deref() != Some(caller.as_str()) || input.url.trim().is_empty() {
            return Err(bad_request("Failed to create record."));
        }

        let now = timestamp();
        let link = Link {
            id: new_record_id(),
            url: input.url.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            tags: input.tags.clone(),
            visibility: input.visibility,
            user: caller,
            favicon: Some(input.favicon.clone()),
            clicks: input.clicks.unwrap_or(0),
            created: Some(now.clone()),
            updated: Some(now),
        };
        self.write().links.push(link.clone());
        self.emit("create", &link.id);
        Ok(link)
    }

    async fn update_link(&self, id: &str, input: &LinkInput) -> Result<Link, BackendError> {
        let caller = self.caller_id();
        let updated = {
            let mut state = self.write();
            let link = state
                .links
                .iter_mut()
                .find(|link| link.id == id && caller.as_deref() == Some(link.user.as_str()))
                .ok_or_else(|| BackendError::NotFound(format!("links/{}", id)))?;

            link.url = input.url.clone();
            link.name = input.name.clone();
            link.description = input.description.clone();
            link.tags = input.tags.clone();
            link.visibility = input.visibility;
            link.favicon = Some(input.favicon.clone());
            if let Some(clicks) = input.clicks {
                link.clicks = clicks;
            }
            link.updated = Some(timestamp());
            link.clone()
        };
        self.emit("update", id);
        Ok(updated)
    }

    async fn delete_link(&self, id: &str) -> Result<(), BackendError> {
        let caller = self.caller_id();
        {
            let mut state = self.write();
            let position = state
                .links
                .iter()
                .position(|link| link.id == id && caller.as_deref() == Some(link.user.as_str()))
                .ok_or_else(|| BackendError::NotFound(format!("links/{}", id)))?;
            state.links.remove(position);
        }
        self.emit("delete", id);
        Ok(())
    }

    async fn subscribe_links(&self) -> Result<broadcast::Receiver<RecordEvent>, BackendError> {
        Ok(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Filter;
    use crate::models::{LinkFormData, Visibility};

    fn backend_with_user(id: &str) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert_user(UserRecord::new(id, format!("{}@example.com", id)));
        backend
    }

    fn sign_in(backend: &MemoryBackend, id: &str) {
        let token = backend.issue_token(id);
        let user = backend.read().users.get(id).cloned();
        backend.auth_store().save(token, user);
    }

    fn input(url: &str, owner: &str) -> LinkInput {
        LinkInput::from_form(&LinkFormData::new(url, "name"), String::new()).owned_by(owner)
    }

    #[tokio::test]
    async fn test_get_user_only_for_self() {
        let backend = backend_with_user("u1");
        backend.insert_user(UserRecord::new("u2", "u2@example.com"));

        assert!(backend.get_user("u1").await.unwrap_err().is_not_found());

        sign_in(&backend, "u1");
        assert_eq!(backend.get_user("u1").await.unwrap().id, "u1");
        assert!(backend.get_user("u2").await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_and_expired_tokens_are_rejected() {
        let backend = backend_with_user("u1");
        sign_in(&backend, "u1");
        backend.revoke_token(&backend.auth_store().token());
        assert!(backend.get_user("u1").await.is_err());

        let expired = backend.issue_token_with_expiry("u1", Utc::now() - Duration::hours(1));
        backend
            .auth_store()
            .save(expired, Some(UserRecord::new("u1", "")));
        assert!(backend.get_user("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let backend = backend_with_user("u1");
        sign_in(&backend, "u1");
        let before = backend.auth_store().token();

        let response = backend.auth_refresh().await.unwrap();

        let after = backend.auth_store().token();
        assert_ne!(before, after);
        assert_eq!(response.token.as_deref(), Some(after.as_str()));
    }

    #[tokio::test]
    async fn test_private_links_visible_to_owner_only() {
        let backend = backend_with_user("u1");
        backend.insert_user(UserRecord::new("u2", "u2@example.com"));
        sign_in(&backend, "u1");

        let mut private = input("https://secret.example", "u1");
        private.visibility = Visibility::Private;
        let created = backend.create_link(&private).await.unwrap();

        sign_in(&backend, "u2");
        let listed = backend.list_links(&ListQuery::default()).await.unwrap();
        assert!(listed.items.is_empty());
        assert!(backend.get_link(&created.id).await.is_err());
        assert!(backend.delete_link(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_create_requires_matching_owner() {
        let backend = backend_with_user("u1");
        sign_in(&backend, "u1");

        assert!(backend.create_link(&input("https://a.example", "u2")).await.is_err());
        assert!(backend.create_link(&input("https://a.example", "u1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter() {
        let backend = backend_with_user("u1");
        sign_in(&backend, "u1");
        for url in ["https://a.example", "https://b.example", "https://c.example"] {
            backend.create_link(&input(url, "u1")).await.unwrap();
        }

        let query = ListQuery::filtered(Filter::eq("user", "u1")).newest_first();
        let result = backend.list_links(&query).await.unwrap();

        let urls: Vec<&str> = result.items.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, ["https://c.example", "https://b.example", "https://a.example"]);
        assert_eq!(result.total_items, 3);
        assert_eq!(result.total_pages, 1);
    }

    #[tokio::test]
    async fn test_mutations_emit_events() {
        let backend = backend_with_user("u1");
        sign_in(&backend, "u1");
        let mut events = backend.subscribe_links().await.unwrap();

        let link = backend.create_link(&input("https://a.example", "u1")).await.unwrap();
        backend.delete_link(&link.id).await.unwrap();

        assert_eq!(events.recv().await.unwrap().action, "create");
        let deleted = events.recv().await.unwrap();
        assert_eq!(deleted.action, "delete");
        assert_eq!(deleted.record, link.id);
    }

    #[tokio::test]
    async fn test_oauth_exchange_requires_issued_verifier() {
        let backend = backend_with_user("u1");
        backend.set_oauth_user(Some("u1"));
        let provider = backend.auth_methods().await.unwrap().remove(0);

        let mut exchange = OAuth2CodeExchange {
            provider: provider.name.clone(),
            code: "code".to_string(),
            code_verifier: "forged".to_string(),
            redirect_url: "http://localhost/auth/callback".to_string(),
            create_data: serde_json::Value::Null,
        };
        assert!(backend.auth_with_oauth2_code(&exchange).await.is_err());

        exchange.code_verifier = provider.code_verifier;
        let response = backend.auth_with_oauth2_code(&exchange).await.unwrap();
        assert_eq!(response.record.unwrap().id, "u1");
        assert!(backend.auth_store().is_valid());
        assert!(backend.read().oauth_states.is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_oauth_states_are_bounded() {
        let backend = MemoryBackend::new();
        for _ in 0..MAX_PENDING_OAUTH_STATES + 20 {
            backend.auth_methods().await.unwrap();
        }
        assert_eq!(backend.read().oauth_states.len(), MAX_PENDING_OAUTH_STATES);

        let later = Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES + 1);
        backend.write().prune_oauth_states(later);
        assert!(backend.read().oauth_states.is_empty());
    }
}
