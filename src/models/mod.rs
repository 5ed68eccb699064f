//! Data models
//!
//! This module contains the data structures used throughout LinkSync:
//! - Backend records (Link, UserRecord)
//! - Session state (Session, AuthSnapshot)
//! - Scraped page metadata

mod link;
mod metadata;
mod session;
mod user;

pub use link::{parse_tags, Link, LinkFormData, LinkInput, Visibility};
pub use metadata::UrlMetadata;
pub use session::{token_expired_at, AuthSnapshot, Session, TokenClaims};
pub use user::UserRecord;

#[cfg(test)]
pub(crate) use session::encode_test_token;
