//! LinkSync - A bookmark manager backed by PocketBase
//!
//! This library provides the core functionality of the LinkSync server:
//! session management, the link repository, the metadata fetch proxy and
//! the legacy link importer.

pub mod api;
pub mod backend;
pub mod config;
pub mod import;
pub mod models;
pub mod services;
pub mod storage;
