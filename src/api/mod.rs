//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP endpoints of the LinkSync server:
//! - Metadata fetch proxy
//! - Session endpoints and the OAuth2 callback
//! - Link endpoints, including live search over server-sent events
//! - Auth debug console (development only)

pub mod auth;
pub mod debug;
pub mod links;
pub mod metadata;
pub mod middleware;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;

pub use auth::PendingOAuth;
pub use middleware::{ApiError, AppState};

/// Build the /api router
pub fn build_api_router(state: AppState, debug_enabled: bool) -> Router<AppState> {
    let router = Router::new()
        .merge(metadata::router())
        .nest("/auth", auth::router())
        .merge(links::router(state));

    if debug_enabled {
        router.merge(debug::router())
    } else {
        router
    }
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .nest(
            "/api",
            build_api_router(state.clone(), config.debug.enabled),
        )
        .route("/auth/callback", get(auth::oauth_callback))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.server.cors_origin)),
        )
        .with_state(state)
}
