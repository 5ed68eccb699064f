//! LinkSync - A bookmark manager backed by PocketBase

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linksync::{
    api::{self, AppState, PendingOAuth},
    backend::create_backend,
    config::Config,
    services::{
        DebugConsole, LinkService, MetadataFetcher, MetadataService, SessionCache,
        SessionManager, SessionSettings,
    },
    storage::create_storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linksync=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LinkSync...");

    // Load configuration (.env is read inside)
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Backend and session persistence
    let backend = create_backend(&config.backend).context("Failed to create backend client")?;
    tracing::info!("Backend: {:?} {}", config.backend.driver, config.backend.url);

    let storage = create_storage(&config.session).context("Failed to open session storage")?;
    let session = Arc::new(SessionManager::new(
        backend.clone(),
        SessionCache::new(storage),
        SessionSettings::from(&config.session),
    ));

    // Services
    let metadata: Arc<dyn MetadataFetcher> = Arc::new(
        MetadataService::new(&config.metadata).context("Failed to create metadata client")?,
    );
    let links = Arc::new(LinkService::new(backend, metadata.clone()));
    let debug = config
        .debug
        .enabled
        .then(|| Arc::new(DebugConsole::new(session.clone())));

    session.initialize().await;
    tracing::info!(
        "Session initialized (authenticated: {})",
        session.snapshot().is_authenticated()
    );

    let state = AppState {
        session: session.clone(),
        links,
        metadata,
        debug,
        oauth: Arc::new(PendingOAuth::default()),
    };

    // Build router
    let app = api::build_router(state, &config);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown();
    tracing::info!("LinkSync stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
