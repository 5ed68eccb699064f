//! Link API endpoints
//!
//! Public:
//! - GET /api/links/public - Everyone's public links
//! - GET /api/links/search - Keyword search
//! - GET /api/links/search/stream - Live search results (SSE)
//! - POST /api/links/duplicates - Duplicate URL/domain check
//! - GET /api/links/{id} - One link (public, or own with a session)
//!
//! Session required:
//! - GET /api/links - Own links
//! - POST /api/links - Create
//! - PUT /api/links/{id} - Update
//! - DELETE /api/links/{id} - Delete

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::middleware::{require_session, ApiError, AppState};
use crate::models::{Link, LinkFormData};

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default, rename = "includePrivate")]
    pub include_private: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheckRequest {
    pub url: String,
    #[serde(default)]
    pub public_only: bool,
}

#[derive(Debug, Serialize)]
pub struct DuplicateCheckResponse {
    pub url: bool,
    /// Only checked against own links
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<bool>,
}

/// Build the link router (mounted under /api)
pub fn router(state: AppState) -> Router<AppState> {
    let session_required = axum_middleware::from_fn_with_state(state, require_session);

    Router::new()
        .route("/links/public", get(list_public_links))
        .route("/links/search", get(search_links))
        .route("/links/search/stream", get(search_stream))
        .route("/links/duplicates", post(check_duplicates))
        .route(
            "/links",
            get(list_user_links)
                .post(create_link)
                .route_layer(session_required.clone()),
        )
        .route(
            "/links/{id}",
            get(get_link).merge(
                put(update_link)
                    .delete(delete_link)
                    .route_layer(session_required),
            ),
        )
}

/// GET /api/links
async fn list_user_links(State(state): State<AppState>) -> Result<Json<Vec<Link>>, ApiError> {
    Ok(Json(state.links.get_user_links().await?))
}

/// POST /api/links
async fn create_link(
    State(state): State<AppState>,
    Json(form): Json<LinkFormData>,
) -> Result<(StatusCode, Json<Link>), ApiError> {
    if form.url.trim().is_empty() {
        return Err(ApiError::validation_error("URL is required"));
    }
    let link = state.links.create_link(&form).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// GET /api/links/{id}
async fn get_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Link>, ApiError> {
    Ok(Json(state.links.get_link_by_id(&id).await?))
}

/// PUT /api/links/{id}
async fn update_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<LinkFormData>,
) -> Result<Json<Link>, ApiError> {
    if form.url.trim().is_empty() {
        return Err(ApiError::validation_error("URL is required"));
    }
    Ok(Json(state.links.update_link(&id, &form).await?))
}

/// DELETE /api/links/{id}
async fn delete_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.links.delete_link(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/links/public
async fn list_public_links(State(state): State<AppState>) -> Result<Json<Vec<Link>>, ApiError> {
    Ok(Json(state.links.get_public_links().await?))
}

/// GET /api/links/search?q=&includePrivate=
async fn search_links(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Link>>, ApiError> {
    Ok(Json(
        state.links.search_links(&query.q, query.include_private).await?,
    ))
}

/// GET /api/links/search/stream?q=&includePrivate=
///
/// Emits a `links` event with the full result set now and after every change
/// to the collection. The live search stops when the client disconnects.
async fn search_stream(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<Link>>();
    let subscription = state
        .links
        .subscribe_to_search_results(&query.q, query.include_private, move |links| {
            let _ = tx.send(links);
        })
        .await;

    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let links = rx.recv().await?;
        let event = Event::default().event("links").json_data(&links);
        Some((event, (rx, subscription)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// POST /api/links/duplicates
async fn check_duplicates(
    State(state): State<AppState>,
    Json(request): Json<DuplicateCheckRequest>,
) -> Result<Json<DuplicateCheckResponse>, ApiError> {
    let url = state
        .links
        .check_duplicate_url(&request.url, request.public_only)
        .await?;

    let domain = if request.public_only {
        None
    } else {
        Some(state.links.check_duplicate_domain(&request.url).await?)
    };

    Ok(Json(DuplicateCheckResponse { url, domain }))
}
