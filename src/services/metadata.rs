//! URL metadata scraping
//!
//! Fetches a page and extracts title, description, preview image, logo and
//! canonical URL from its `<meta>`, `<link>` and `<title>` tags. When the
//! page declares no logo, the site's `/favicon.ico` is probed and Google's
//! favicon service is used as the last resort.
//!
//! Successful results are cached in-process with moka.

use std::collections::HashMap;

use async_trait::async_trait;
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::MetadataConfig;
use crate::models::UrlMetadata;

const MAX_CACHED_PAGES: u64 = 1_000;

static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("static regex"));
static LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("static regex"));
static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("static regex"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("static regex")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Error types for metadata fetching
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("URL is required")]
    MissingUrl,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to fetch page: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Source of page metadata for link enrichment.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<UrlMetadata, MetadataError>;
}

/// Scrapes pages over HTTP.
pub struct MetadataService {
    http: reqwest::Client,
    cache: Cache<String, UrlMetadata>,
}

impl std::fmt::Debug for MetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataService")
            .field("cached_pages", &self.cache.entry_count())
            .finish()
    }
}

impl MetadataService {
    pub fn new(config: &MetadataConfig) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            cache: Cache::builder()
                .max_capacity(MAX_CACHED_PAGES)
                .time_to_live(config.cache_ttl())
                .build(),
        })
    }

    async fn scrape(&self, page: &Url) -> Result<UrlMetadata, MetadataError> {
        let html = self.http.get(page.clone()).send().await?.text().await?;
        let mut metadata = extract_metadata(&html, page);

        if metadata.logo.is_none() {
            metadata.logo = Some(self.fallback_logo(page).await);
        }
        Ok(metadata)
    }

    /// `/favicon.ico` when the site serves one, Google's favicon service
    /// otherwise, and an empty string for URLs without a host.
    async fn fallback_logo(&self, page: &Url) -> String {
        let Some(host) = page.host_str().filter(|h| !h.is_empty()) else {
            tracing::warn!("Cannot derive favicon for {}: no host", page);
            return String::new();
        };

        let candidate = format!("https://{}/favicon.ico", host);
        let reachable = match self.http.head(&candidate).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Favicon probe for {} failed: {}", host, e);
                false
            }
        };

        if reachable {
            candidate
        } else {
            google_favicon(host)
        }
    }
}

#[async_trait]
impl MetadataFetcher for MetadataService {
    async fn fetch(&self, url: &str) -> Result<UrlMetadata, MetadataError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MetadataError::MissingUrl);
        }
        let page = Url::parse(url).map_err(|e| MetadataError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(hit) = self.cache.get(url).await {
            tracing::debug!("Metadata cache hit for {}", url);
            return Ok(hit);
        }

        let metadata = self.scrape(&page).await?;
        self.cache.insert(url.to_string(), metadata.clone()).await;
        Ok(metadata)
    }
}

pub fn google_favicon(host: &str) -> String {
    format!(
        "https://www.google.com/s2/favicons?domain={}&sz=64",
        urlencoding::encode(host)
    )
}

type Attributes = HashMap<String, String>;

fn parse_attributes(tag: &str) -> Attributes {
    ATTRIBUTE
        .captures_iter(tag)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3)).or_else(|| cap.get(4))?;
            Some((name, decode_entities(value.as_str())))
        })
        .collect()
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn clean_text(raw: &str) -> Option<String> {
    let text = WHITESPACE.replace_all(raw.trim(), " ").into_owned();
    (!text.is_empty()).then_some(text)
}

struct Document {
    metas: Vec<Attributes>,
    links: Vec<Attributes>,
    title: Option<String>,
}

impl Document {
    fn parse(html: &str) -> Self {
        Self {
            metas: META_TAG
                .find_iter(html)
                .map(|m| parse_attributes(m.as_str()))
                .collect(),
            links: LINK_TAG
                .find_iter(html)
                .map(|m| parse_attributes(m.as_str()))
                .collect(),
            title: TITLE_TAG
                .captures(html)
                .and_then(|cap| cap.get(1))
                .and_then(|m| clean_text(&decode_entities(m.as_str()))),
        }
    }

    /// Content of the first meta tag named by `keys`, in key order.
    fn meta(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| {
            self.metas.iter().find_map(|attrs| {
                let named = ["property", "name", "itemprop"].iter().any(|attr| {
                    attrs
                        .get(*attr)
                        .is_some_and(|value| value.trim().eq_ignore_ascii_case(key))
                });
                if named {
                    attrs.get("content").and_then(|c| clean_text(c))
                } else {
                    None
                }
            })
        })
    }

    /// `href` of the first link whose `rel` contains every word of one of
    /// `rels`, in rel order.
    fn link(&self, rels: &[&str]) -> Option<String> {
        rels.iter().find_map(|wanted| {
            self.links.iter().find_map(|attrs| {
                let rel = attrs.get("rel")?.to_ascii_lowercase();
                let words: Vec<&str> = rel.split_whitespace().collect();
                let matches = wanted.split_whitespace().all(|w| words.contains(&w));
                if matches {
                    attrs.get("href").and_then(|h| clean_text(h))
                } else {
                    None
                }
            })
        })
    }
}

fn resolve(base: &Url, reference: String) -> Option<String> {
    base.join(&reference).ok().map(String::from)
}

/// Extract metadata from `html` served at `page`.
///
/// Relative image, logo and canonical references are resolved against
/// `page`. `url` falls back to `page` itself.
pub fn extract_metadata(html: &str, page: &Url) -> UrlMetadata {
    let doc = Document::parse(html);

    let title = doc
        .meta(&["og:title", "twitter:title"])
        .or_else(|| doc.title.clone());
    let description = doc.meta(&["og:description", "twitter:description", "description"]);
    let image = doc
        .meta(&["og:image", "og:image:url", "twitter:image", "twitter:image:src"])
        .or_else(|| doc.link(&["image_src"]))
        .and_then(|href| resolve(page, href));
    let logo = doc
        .link(&["apple-touch-icon", "apple-touch-icon-precomposed", "icon", "shortcut icon"])
        .or_else(|| doc.meta(&["og:logo"]))
        .and_then(|href| resolve(page, href));
    let url = doc
        .meta(&["og:url"])
        .or_else(|| doc.link(&["canonical"]))
        .and_then(|href| resolve(page, href))
        .unwrap_or_else(|| page.to_string());

    UrlMetadata {
        title,
        description,
        image,
        logo,
        url: Some(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>  Fallback
    Title </title>
  <meta name="description" content="Plain description">
  <meta property="og:description" content="Open &amp; Graph">
  <meta name='twitter:title' content='Twitter Title'>
  <meta property="og:image" content="/img/preview.png">
  <link rel="shortcut icon" href="/favicon.png">
  <link rel="apple-touch-icon" sizes="180x180" href="/apple.png">
  <link rel="canonical" href="https://example.com/canonical">
</head><body></body></html>"#;

    fn page_url() -> Url {
        Url::parse("https://example.com/articles/1?ref=x").unwrap()
    }

    fn service() -> MetadataService {
        MetadataService::new(&MetadataConfig {
            timeout_secs: 2,
            ..MetadataConfig::default()
        })
        .unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_extract_precedence() {
        let metadata = extract_metadata(PAGE, &page_url());

        assert_eq!(metadata.title.as_deref(), Some("Twitter Title"));
        assert_eq!(metadata.description.as_deref(), Some("Open & Graph"));
        assert_eq!(metadata.image.as_deref(), Some("https://example.com/img/preview.png"));
        assert_eq!(metadata.logo.as_deref(), Some("https://example.com/apple.png"));
        assert_eq!(metadata.url.as_deref(), Some("https://example.com/canonical"));
    }

    #[test]
    fn test_extract_fallbacks() {
        let html = r#"<html><head><title>Only &lt;Title&gt;</title>
            <link rel="icon" href="icons/site.ico"></head></html>"#;

        let metadata = extract_metadata(html, &page_url());

        assert_eq!(metadata.title.as_deref(), Some("Only <Title>"));
        assert!(metadata.description.is_none());
        assert!(metadata.image.is_none());
        assert_eq!(metadata.logo.as_deref(), Some("https://example.com/articles/icons/site.ico"));
        assert_eq!(metadata.url.as_deref(), Some("https://example.com/articles/1?ref=x"));
    }

    #[test]
    fn test_extract_empty_page() {
        let metadata = extract_metadata("", &page_url());

        assert!(metadata.title.is_none());
        assert!(metadata.logo.is_none());
        assert!(metadata.url.is_some());
    }

    #[test]
    fn test_google_favicon_url() {
        assert_eq!(
            google_favicon("example.com"),
            "https://www.google.com/s2/favicons?domain=example.com&sz=64"
        );
    }

    #[tokio::test]
    async fn test_fetch_page_with_logo() {
        let base = serve(Router::new().route("/", get(|| async { axum::response::Html(PAGE) }))).await;

        let metadata = service().fetch(&format!("{}/", base)).await.unwrap();

        assert_eq!(metadata.title.as_deref(), Some("Twitter Title"));
        assert_eq!(metadata.logo.as_deref(), Some(format!("{}/apple.png", base).as_str()));
    }

    #[tokio::test]
    async fn test_fetch_without_logo_falls_back_to_google() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { axum::response::Html("<title>Bare</title>") }),
        ))
        .await;

        let metadata = service().fetch(&format!("{}/", base)).await.unwrap();

        // Nothing serves https://127.0.0.1/favicon.ico
        assert_eq!(metadata.logo.unwrap(), google_favicon("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_fetch_caches_results() {
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        let base = serve(Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    axum::response::Html(PAGE)
                }
            }),
        ))
        .await;
        let service = service();
        let url = format!("{}/", base);

        service.fetch(&url).await.unwrap();
        service.fetch(&url).await.unwrap();

        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let service = service();

        assert!(matches!(service.fetch("  ").await, Err(MetadataError::MissingUrl)));
        assert!(matches!(
            service.fetch("not a url").await,
            Err(MetadataError::InvalidUrl { .. })
        ));
        assert!(matches!(
            service.fetch("http://127.0.0.1:9/").await,
            Err(MetadataError::Fetch(_))
        ));
    }
}
