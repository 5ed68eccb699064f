//! URL metadata model

use serde::{Deserialize, Serialize};

/// Fields scraped from a web page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UrlMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    /// Canonical URL of the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
