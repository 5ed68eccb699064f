//! Link model
//!
//! This module defines the Link record stored in the `links` collection and
//! the form input used to create or update one.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Link record as stored by the backend.
///
/// Every link is owned by exactly one user. Tags are free-form and may repeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Record ID assigned by the backend
    #[serde(default)]
    pub id: String,
    /// Bookmarked URL
    pub url: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Ordered tag list
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    /// Read-access scope
    #[serde(default)]
    pub visibility: Visibility,
    /// Owner (user record ID)
    #[serde(default)]
    pub user: String,
    /// Favicon or logo URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    /// Click counter carried over from the legacy database
    #[serde(default)]
    pub clicks: i64,
    /// Creation timestamp (backend format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last update timestamp (backend format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl Link {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Per-link access scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by anyone
    #[default]
    Public,
    /// Readable by the owner only
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("Invalid visibility: {}", other)),
        }
    }
}

/// Form input for creating or updating a link.
///
/// `tags` is the raw comma-separated string typed by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkFormData {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub visibility: Visibility,
}

impl LinkFormData {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            description: String::new(),
            tags: String::new(),
            visibility: Visibility::default(),
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Tags split on commas, trimmed, with empty entries dropped.
    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }
}

/// Split a comma-separated tag string.
///
/// Order is preserved and duplicates are kept.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Record body sent to the backend on create/update.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LinkInput {
    pub url: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    /// Only set on create; updates never move ownership
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub favicon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicks: Option<i64>,
}

impl LinkInput {
    pub fn from_form(form: &LinkFormData, favicon: String) -> Self {
        Self {
            url: form.url.clone(),
            name: form.name.clone(),
            description: form.description.clone(),
            tags: form.tag_list(),
            visibility: form.visibility,
            user: None,
            favicon,
            clicks: None,
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.user = Some(user_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_tags_trims_and_drops_empty() {
        assert_eq!(
            parse_tags("work, reading,, work"),
            vec!["work", "reading", "work"]
        );
        assert_eq!(parse_tags(" a, b ,,a "), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_parse_tags_empty_input() {
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(" , ,").is_empty());
    }

    #[test]
    fn test_visibility_parse_and_display() {
        assert_eq!("Private".parse::<Visibility>(), Ok(Visibility::Private));
        assert_eq!(" public ".parse::<Visibility>(), Ok(Visibility::Public));
        assert!("friends".parse::<Visibility>().is_err());
        assert_eq!(Visibility::Private.to_string(), "private");
    }

    #[test]
    fn test_link_deserializes_backend_record() {
        let json = serde_json::json!({
            "id": "abc123def456ghi",
            "collectionId": "pbc_links",
            "collectionName": "links",
            "url": "https://example.com",
            "name": "Example",
            "description": "",
            "tags": null,
            "visibility": "private",
            "user": "u1",
            "favicon": "https://example.com/favicon.ico",
            "created": "2024-05-01 10:00:00.000Z",
            "updated": "2024-05-01 10:00:00.000Z"
        });

        let link: Link = serde_json::from_value(json).unwrap();

        assert_eq!(link.id, "abc123def456ghi");
        assert!(link.tags.is_empty());
        assert_eq!(link.visibility, Visibility::Private);
        assert!(!link.is_public());
        assert_eq!(link.clicks, 0);
    }

    #[test]
    fn test_link_input_omits_owner_on_update() {
        let form = LinkFormData::new("https://example.com", "Example").with_tags("a,b");
        let update = serde_json::to_value(LinkInput::from_form(&form, String::new())).unwrap();
        let create = serde_json::to_value(
            LinkInput::from_form(&form, String::new()).owned_by("u1"),
        )
        .unwrap();

        assert!(update.get("user").is_none());
        assert_eq!(create["user"], "u1");
        assert_eq!(create["tags"], serde_json::json!(["a", "b"]));
    }

    proptest! {
        #[test]
        fn parsed_tags_are_trimmed_and_non_empty(raw in "[a-z ,]{0,40}") {
            for tag in parse_tags(&raw) {
                prop_assert!(!tag.is_empty());
                prop_assert_eq!(tag.trim(), tag.as_str());
                prop_assert!(!tag.contains(','));
            }
        }
    }
}
