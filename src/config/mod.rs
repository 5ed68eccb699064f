//! Configuration management
//!
//! This module handles loading and parsing configuration for LinkSync.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend (PocketBase) configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Session persistence and refresh configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Metadata scraping configuration
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Development helpers
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the UI dev server)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5174
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend driver (pocketbase or memory)
    #[serde(default)]
    pub driver: BackendDriver,
    /// PocketBase base URL
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: BackendDriver::default(),
            url: default_backend_url(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

/// Backend driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendDriver {
    /// Remote PocketBase instance (default)
    #[default]
    Pocketbase,
    /// In-process store, for offline development
    Memory,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the persisted session lives (file or memory)
    #[serde(default)]
    pub storage: StorageDriver,
    /// Path of the storage file when `storage` is `file`
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Token refresh period in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// OAuth2 callback URL registered with the provider
    #[serde(default = "default_oauth_redirect_url")]
    pub oauth_redirect_url: String,
    /// OAuth2 provider name as configured in PocketBase
    #[serde(default = "default_oauth_provider")]
    pub oauth_provider: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage: StorageDriver::default(),
            storage_path: default_storage_path(),
            refresh_interval_secs: default_refresh_interval(),
            oauth_redirect_url: default_oauth_redirect_url(),
            oauth_provider: default_oauth_provider(),
        }
    }
}

impl SessionConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/local_storage.json")
}

fn default_refresh_interval() -> u64 {
    10 * 60 // 10 minutes
}

fn default_oauth_redirect_url() -> String {
    "http://127.0.0.1:5174/auth/callback".to_string()
}

fn default_oauth_provider() -> String {
    "google".to_string()
}

/// Storage driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// JSON file on disk (default)
    #[default]
    File,
    /// Process memory, lost on exit
    Memory,
}

/// Metadata scraping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Page fetch timeout in seconds
    #[serde(default = "default_metadata_timeout")]
    pub timeout_secs: u64,
    /// How long scraped results are cached
    #[serde(default = "default_metadata_ttl")]
    pub cache_ttl_seconds: u64,
    /// User agent sent when fetching pages
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_metadata_timeout(),
            cache_ttl_seconds: default_metadata_ttl(),
            user_agent: default_user_agent(),
        }
    }
}

impl MetadataConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn default_metadata_timeout() -> u64 {
    10
}

fn default_metadata_ttl() -> u64 {
    3600
}

fn default_user_agent() -> String {
    concat!("linksync/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Development helpers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Mount the auth debug console routes
    #[serde(default)]
    pub enabled: bool,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - LINKSYNC_SERVER_HOST
    /// - LINKSYNC_SERVER_PORT
    /// - LINKSYNC_SERVER_CORS_ORIGIN
    /// - LINKSYNC_BACKEND_DRIVER
    /// - LINKSYNC_BACKEND_URL
    /// - LINKSYNC_BACKEND_TIMEOUT_SECS
    /// - LINKSYNC_SESSION_STORAGE_PATH
    /// - LINKSYNC_SESSION_REFRESH_INTERVAL_SECS
    /// - LINKSYNC_SESSION_OAUTH_REDIRECT_URL
    /// - LINKSYNC_METADATA_TIMEOUT_SECS
    /// - LINKSYNC_METADATA_CACHE_TTL_SECONDS
    /// - LINKSYNC_DEBUG_ENABLED
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to read .env file: {}", e);
            }
        }

        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the rest of the system cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.refresh_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.backend.driver == BackendDriver::Pocketbase && self.backend.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.url is required for the pocketbase driver".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("LINKSYNC_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("LINKSYNC_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("LINKSYNC_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Backend configuration
        if let Ok(driver) = std::env::var("LINKSYNC_BACKEND_DRIVER") {
            match driver.to_lowercase().as_str() {
                "pocketbase" => self.backend.driver = BackendDriver::Pocketbase,
                "memory" => self.backend.driver = BackendDriver::Memory,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("LINKSYNC_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Ok(timeout) = std::env::var("LINKSYNC_BACKEND_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.backend.timeout_secs = timeout;
            }
        }

        // Session configuration
        if let Ok(path) = std::env::var("LINKSYNC_SESSION_STORAGE_PATH") {
            self.session.storage_path = PathBuf::from(path);
        }
        if let Ok(interval) = std::env::var("LINKSYNC_SESSION_REFRESH_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.session.refresh_interval_secs = interval;
            }
        }
        if let Ok(url) = std::env::var("LINKSYNC_SESSION_OAUTH_REDIRECT_URL") {
            self.session.oauth_redirect_url = url;
        }

        // Metadata configuration
        if let Ok(timeout) = std::env::var("LINKSYNC_METADATA_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.metadata.timeout_secs = timeout;
            }
        }
        if let Ok(ttl) = std::env::var("LINKSYNC_METADATA_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.metadata.cache_ttl_seconds = ttl;
            }
        }

        if let Ok(enabled) = std::env::var("LINKSYNC_DEBUG_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.debug.enabled = true,
                "0" | "false" | "no" => self.debug.enabled = false,
                _ => {}
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
