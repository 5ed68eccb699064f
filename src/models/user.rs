//! User model
//!
//! Record of the `users` auth collection. Only the fields this application
//! reads are typed; everything else the backend returns is kept in `extra`
//! so a persisted session round-trips without loss.

use serde::{Deserialize, Serialize};

/// Authenticated user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    /// Record ID (never empty for a valid record)
    pub id: String,
    /// Email address (may be hidden by the backend)
    #[serde(default)]
    pub email: String,
    /// Display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Avatar file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether the email address is verified
    #[serde(default)]
    pub verified: bool,
    /// Creation timestamp (backend format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last update timestamp (backend format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    /// Remaining backend fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: String::new(),
            avatar: None,
            verified: false,
            created: None,
            updated: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Parse a loosely-typed record, rejecting ones without an ID.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let record: Self = serde_json::from_value(value).ok()?;
        if record.id.trim().is_empty() {
            return None;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_round_trip() {
        let value = json!({
            "id": "u1",
            "email": "ada@example.com",
            "emailVisibility": true,
            "collectionName": "users"
        });

        let record = UserRecord::from_value(value.clone()).unwrap();
        assert_eq!(record.extra["emailVisibility"], json!(true));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["collectionName"], "users");
        assert_eq!(back["email"], "ada@example.com");
    }

    #[test]
    fn test_from_value_requires_id() {
        assert!(UserRecord::from_value(json!({"email": "a@b.c"})).is_none());
        assert!(UserRecord::from_value(json!({"id": "  "})).is_none());
        assert!(UserRecord::from_value(json!("not an object")).is_none());
    }
}
