//! Link service
//!
//! CRUD and search over the `links` collection for the signed-in user:
//! - own links, public links and keyword search
//! - favicon enrichment on create and update
//! - duplicate URL and domain detection
//! - live search results driven by collection change events
//!
//! Read access rules are enforced by the backend; this layer only checks
//! that a session exists before owner-scoped operations.

use std::sync::Arc;

use tokio::task::JoinHandle;
use url::Url;

use super::metadata::MetadataFetcher;
use crate::backend::{BackendError, DynBackend, Filter, ListQuery};
use crate::models::{Link, LinkFormData, LinkInput};

/// Error types for link operations
#[derive(Debug, thiserror::Error)]
pub enum LinkServiceError {
    #[error("User not authenticated")]
    Unauthenticated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Extra knobs for [`LinkService::create_link_with_options`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Look up a favicon for the URL before saving
    pub fetch_favicon: bool,
    /// Initial click count
    pub clicks: Option<i64>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            fetch_favicon: true,
            clicks: None,
        }
    }
}

/// Strip the scheme and one trailing slash for URL comparison.
pub fn normalize_url(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.strip_suffix('/').unwrap_or(without_scheme)
}

/// Visibility part of a search filter, plus the keyword part when `query`
/// is not blank.
pub fn search_filter(query: &str, private_owner: Option<&str>) -> Filter {
    let scope = match private_owner {
        Some(user_id) => Filter::any([
            Filter::eq("visibility", "public"),
            Filter::all([
                Filter::eq("visibility", "private"),
                Filter::eq("user", user_id),
            ]),
        ]),
        None => Filter::eq("visibility", "public"),
    };

    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return scope;
    }
    scope.and(Filter::any([
        Filter::like("name", query.as_str()),
        Filter::like("description", query.as_str()),
        Filter::like("tags", query.as_str()),
    ]))
}

/// Handle of a live search; dropping it stops delivery.
#[derive(Debug, Default)]
pub struct SearchSubscription {
    task: Option<JoinHandle<()>>,
}

impl SearchSubscription {
    fn inert() -> Self {
        Self::default()
    }

    /// Whether results are still being delivered
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SearchSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[derive(Clone)]
pub struct LinkService {
    backend: DynBackend,
    metadata: Arc<dyn MetadataFetcher>,
}

impl LinkService {
    pub fn new(backend: DynBackend, metadata: Arc<dyn MetadataFetcher>) -> Self {
        Self { backend, metadata }
    }

    /// ID of the signed-in user, if the held token is usable
    fn session_user(&self) -> Option<String> {
        let store = self.backend.auth_store();
        if store.is_valid() {
            store.user_id()
        } else {
            None
        }
    }

    fn require_user(&self) -> Result<String, LinkServiceError> {
        self.session_user().ok_or(LinkServiceError::Unauthenticated)
    }

    async fn list(&self, query: ListQuery) -> Result<Vec<Link>, LinkServiceError> {
        Ok(self.backend.list_links(&query).await?.items)
    }

    /// Logo of `url`, or an empty string when it cannot be determined.
    async fn favicon_for(&self, url: &str) -> String {
        match self.metadata.fetch(url).await {
            Ok(metadata) => metadata.logo.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to fetch favicon for {}: {}", url, e);
                String::new()
            }
        }
    }

    /// Own links, newest first.
    pub async fn get_user_links(&self) -> Result<Vec<Link>, LinkServiceError> {
        let user_id = self.require_user()?;
        self.list(ListQuery::filtered(Filter::eq("user", user_id)).newest_first())
            .await
            .inspect_err(|e| tracing::error!("Error fetching user links: {}", e))
    }

    pub async fn create_link(&self, form: &LinkFormData) -> Result<Link, LinkServiceError> {
        self.create_link_with_options(form, CreateOptions::default())
            .await
    }

    /// Create a link owned by the signed-in user.
    pub async fn create_link_with_options(
        &self,
        form: &LinkFormData,
        options: CreateOptions,
    ) -> Result<Link, LinkServiceError> {
        let user_id = self.require_user()?;

        let favicon = if options.fetch_favicon {
            self.favicon_for(&form.url).await
        } else {
            String::new()
        };
        let mut input = LinkInput::from_form(form, favicon).owned_by(user_id);
        input.clicks = options.clicks;

        let link = self
            .backend
            .create_link(&input)
            .await
            .inspect_err(|e| tracing::error!("Error creating link: {}", e))?;
        tracing::info!("Created link {} for {}", link.id, link.url);
        Ok(link)
    }

    /// Replace the editable fields of a link. The owner never changes.
    pub async fn update_link(&self, id: &str, form: &LinkFormData) -> Result<Link, LinkServiceError> {
        self.require_user()?;

        let favicon = self.favicon_for(&form.url).await;
        let input = LinkInput::from_form(form, favicon);

        self.backend
            .update_link(id, &input)
            .await
            .inspect_err(|e| tracing::error!("Error updating link {}: {}", id, e))
            .map_err(Into::into)
    }

    pub async fn delete_link(&self, id: &str) -> Result<bool, LinkServiceError> {
        self.require_user()?;

        self.backend
            .delete_link(id)
            .await
            .inspect_err(|e| tracing::error!("Error deleting link {}: {}", id, e))?;
        tracing::info!("Deleted link {}", id);
        Ok(true)
    }

    /// Fetch one link. Works without a session for public links.
    pub async fn get_link_by_id(&self, id: &str) -> Result<Link, LinkServiceError> {
        self.backend
            .get_link(id)
            .await
            .inspect_err(|e| tracing::error!("Error fetching link {}: {}", id, e))
            .map_err(Into::into)
    }

    /// Whether `url` is already saved.
    ///
    /// Checks the user's own links, or with `public_only` other users'
    /// public links. Scheme and a trailing slash are ignored.
    pub async fn check_duplicate_url(&self, url: &str, public_only: bool) -> Result<bool, LinkServiceError> {
        let user_id = self.session_user();
        let filter = if public_only {
            Filter::eq("visibility", "public")
        } else {
            let owner = user_id.clone().ok_or(LinkServiceError::Unauthenticated)?;
            Filter::eq("user", owner)
        };

        let candidates = self
            .list(ListQuery::filtered(filter))
            .await
            .inspect_err(|e| tracing::error!("Error checking for duplicate URL: {}", e))?;

        let wanted = normalize_url(url);
        Ok(candidates.iter().any(|link| {
            normalize_url(&link.url) == wanted
                && (!public_only || user_id.as_deref() != Some(link.user.as_str()))
        }))
    }

    pub async fn check_public_duplicate_url(&self, url: &str) -> Result<bool, LinkServiceError> {
        self.check_duplicate_url(url, true).await
    }

    /// Whether any own link points at the same host as `url`.
    pub async fn check_duplicate_domain(&self, url: &str) -> Result<bool, LinkServiceError> {
        let user_id = self.require_user()?;

        let domain = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(ToString::to_string))
            .ok_or_else(|| LinkServiceError::Validation("Invalid URL".to_string()))?;

        let links = self
            .list(ListQuery::filtered(Filter::eq("user", user_id)))
            .await
            .inspect_err(|e| tracing::error!("Error checking for duplicate domain: {}", e))?;

        Ok(links.iter().any(|link| {
            Url::parse(&link.url)
                .ok()
                .is_some_and(|parsed| parsed.host_str() == Some(domain.as_str()))
        }))
    }

    /// Public links of every user, newest first.
    pub async fn get_public_links(&self) -> Result<Vec<Link>, LinkServiceError> {
        self.list(ListQuery::filtered(Filter::eq("visibility", "public")).newest_first())
            .await
            .inspect_err(|e| tracing::error!("Error fetching public links: {}", e))
    }

    fn search_query(&self, query: &str, include_private: bool) -> ListQuery {
        let owner = if include_private {
            self.session_user()
        } else {
            None
        };
        ListQuery::filtered(search_filter(query, owner.as_deref())).newest_first()
    }

    /// Keyword search over name, description and tags.
    ///
    /// With `include_private` and a session, the user's private links are
    /// searched as well.
    pub async fn search_links(&self, query: &str, include_private: bool) -> Result<Vec<Link>, LinkServiceError> {
        self.list(self.search_query(query, include_private))
            .await
            .inspect_err(|e| tracing::error!("Error searching links: {}", e))
    }

    /// Deliver search results now and again after every change to the
    /// collection.
    ///
    /// Failed re-runs are logged and skipped. When the change feed cannot be
    /// opened the returned handle is inert.
    pub async fn subscribe_to_search_results<F>(
        &self,
        query: &str,
        include_private: bool,
        callback: F,
    ) -> SearchSubscription
    where
        F: Fn(Vec<Link>) + Send + Sync + 'static,
    {
        let list_query = self.search_query(query, include_private);

        let mut events = match self.backend.subscribe_links().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Error setting up search subscription: {}", e);
                return SearchSubscription::inert();
            }
        };

        let service = self.clone();
        let task = tokio::spawn(async move {
            match service.list(list_query.clone()).await {
                Ok(links) => callback(links),
                Err(e) => tracing::error!("Error in initial search: {}", e),
            }

            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!("Link {} changed ({}), re-running search", event.record, event.action);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Search subscription skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }

                match service.list(list_query.clone()).await {
                    Ok(links) => callback(links),
                    Err(e) => tracing::error!("Error in realtime search update: {}", e),
                }
            }
        });

        SearchSubscription { task: Some(task) }
    }
}
