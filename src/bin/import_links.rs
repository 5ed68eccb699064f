//! CLI tool to import links from a legacy LinkSync SQL dump.
//!
//! Usage: `cargo run --bin import-links -- --sql-file links.sql [--skip-favicons] [--config config.yml]`
//!
//! Uses the session persisted by the server (sign in there first). Every row
//! becomes a link owned by the signed-in user; URLs already saved are skipped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linksync::{
    backend::create_backend,
    config::Config,
    import::parse_sql_dump,
    services::{
        CreateOptions, LinkService, MetadataFetcher, MetadataService, SessionCache,
        SessionManager, SessionSettings,
    },
    storage::create_storage,
};

#[derive(Parser, Debug)]
#[command(
    name = "import-links",
    about = "Import links from a legacy LinkSync SQL dump"
)]
struct Cli {
    /// SQL dump containing `INSERT INTO `links`` statements
    #[arg(long, value_name = "PATH")]
    sql_file: PathBuf,

    /// Do not look up favicons for imported links
    #[arg(long)]
    skip_favicons: bool,

    /// Server configuration file
    #[arg(long, value_name = "PATH", default_value = "config.yml")]
    config: PathBuf,
}

#[derive(Default)]
struct Summary {
    imported: usize,
    with_favicon: usize,
    duplicates: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linksync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    let config = Config::load_with_env(&args.config)?;

    let sql = std::fs::read_to_string(&args.sql_file)
        .with_context(|| format!("Failed to read {}", args.sql_file.display()))?;
    let rows = parse_sql_dump(&sql);
    if rows.is_empty() {
        bail!("No links found in {}", args.sql_file.display());
    }
    println!("Found {} links in {}", rows.len(), args.sql_file.display());

    let backend = create_backend(&config.backend).context("Failed to create backend client")?;
    let storage = create_storage(&config.session).context("Failed to open session storage")?;
    let session = SessionManager::new(
        backend.clone(),
        SessionCache::new(storage),
        SessionSettings::from(&config.session),
    );
    session.initialize().await;
    if !session.check_auth_status() {
        bail!("No usable session found. Sign in through the LinkSync server first.");
    }
    if let Some(user) = session.snapshot().current_user() {
        println!("Importing as {} ({})", user.email, user.id);
    }

    let metadata: Arc<dyn MetadataFetcher> = Arc::new(
        MetadataService::new(&config.metadata).context("Failed to create metadata client")?,
    );
    let links = LinkService::new(backend, metadata);

    let mut summary = Summary::default();
    for (index, row) in rows.iter().enumerate() {
        let position = format!("[{}/{}]", index + 1, rows.len());

        match links.check_duplicate_url(&row.url, false).await {
            Ok(true) => {
                println!("{} Skipping duplicate {}", position, row.url);
                summary.duplicates += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => eprintln!("{} Could not check {} for duplicates: {}", position, row.url, e),
        }

        let options = CreateOptions {
            fetch_favicon: !args.skip_favicons,
            clicks: Some(row.clicks),
        };
        match links.create_link_with_options(&row.to_form(), options).await {
            Ok(link) => {
                summary.imported += 1;
                if link.favicon.as_deref().is_some_and(|f| !f.is_empty()) {
                    summary.with_favicon += 1;
                }
                println!("{} Imported {}", position, link.url);
            }
            Err(e) => {
                summary.failed += 1;
                eprintln!("{} Failed to import {}: {}", position, row.url, e);
            }
        }
    }

    session.shutdown();

    println!();
    println!("Import complete");
    println!("  imported:     {}", summary.imported);
    println!("  with favicon: {}", summary.with_favicon);
    println!("  duplicates:   {}", summary.duplicates);
    println!("  failed:       {}", summary.failed);

    if summary.failed > 0 {
        bail!("{} links failed to import", summary.failed);
    }
    Ok(())
}
