//! Metadata fetch proxy endpoint
//!
//! - POST /api/fetch-metadata - Scrape title, description, image and logo of a page
//!
//! Errors keep the flat `{error: string}` body clients of this endpoint expect.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::AppState;
use crate::services::MetadataError;

#[derive(Debug, Deserialize)]
pub struct FetchMetadataRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(MetadataErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Build the metadata router (mounted under /api)
pub fn router() -> Router<AppState> {
    Router::new().route("/fetch-metadata", post(fetch_metadata))
}

/// POST /api/fetch-metadata
async fn fetch_metadata(
    State(state): State<AppState>,
    body: Result<Json<FetchMetadataRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            tracing::error!("Error fetching metadata: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch metadata");
        }
    };

    let url = match request.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return error_response(StatusCode::BAD_REQUEST, "URL is required"),
    };

    match state.metadata.fetch(&url).await {
        Ok(metadata) => Json(metadata).into_response(),
        Err(MetadataError::MissingUrl) => error_response(StatusCode::BAD_REQUEST, "URL is required"),
        Err(e) => {
            tracing::error!("Error fetching metadata for {}: {}", url, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch metadata")
        }
    }
}
