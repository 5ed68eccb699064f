//! Services layer - Business logic
//!
//! This module contains the business logic of LinkSync:
//! - Session lifecycle on top of the backend's auth store
//! - Link CRUD, search and duplicate detection
//! - Page metadata scraping
//! - Development-only auth introspection

pub mod debug;
pub mod link;
pub mod metadata;
pub mod session;
pub mod session_cache;

pub use debug::{AuthDebugReport, DebugConsole};
pub use link::{normalize_url, CreateOptions, LinkService, LinkServiceError, SearchSubscription};
pub use metadata::{extract_metadata, MetadataError, MetadataFetcher, MetadataService};
pub use session::{OAuth2Callback, OAuth2Redirect, SessionError, SessionManager, SessionSettings};
pub use session_cache::{SessionCache, AUTH_STORAGE_KEY, LEGACY_AUTH_STORAGE_KEY};
