//! Record filters
//!
//! A small typed rendition of the backend's filter expression language.
//! Filters render to strings such as
//! `(visibility = "public" || user = "abc") && name ~ "rust"` for the remote
//! API, and can also be evaluated against JSON records by the in-memory
//! driver.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field = "value"`
    Eq(String, String),
    /// `field ~ "value"`, case-insensitive substring match
    Like(String, String),
    /// Every sub-filter matches (`&&`)
    All(Vec<Filter>),
    /// At least one sub-filter matches (`||`)
    Any(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn like(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Like(field.into(), value.into())
    }

    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::All(filters.into_iter().collect())
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Any(filters.into_iter().collect())
    }

    /// `self && other`, flattening nested conjunctions
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All(mut filters) => {
                filters.push(other);
                Filter::All(filters)
            }
            first => Filter::All(vec![first, other]),
        }
    }

    /// Render in the backend's expression syntax.
    pub fn render(&self) -> String {
        self.render_inner(true)
    }

    fn render_inner(&self, top_level: bool) -> String {
        match self {
            Filter::Eq(field, value) => format!("{} = \"{}\"", field, escape(value)),
            Filter::Like(field, value) => format!("{} ~ \"{}\"", field, escape(value)),
            Filter::All(filters) => join(filters, " && ", top_level),
            Filter::Any(filters) => join(filters, " || ", top_level),
        }
    }

    /// Evaluate against a JSON record.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => match record.get(field) {
                Some(Value::String(s)) => s == value,
                Some(Value::Null) | None => value.is_empty(),
                Some(other) => other.to_string() == *value,
            },
            Filter::Like(field, value) => {
                let needle = value.to_lowercase();
                match record.get(field) {
                    Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                    Some(Value::Null) | None => false,
                    Some(other) => other.to_string().to_lowercase().contains(&needle),
                }
            }
            Filter::All(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn join(filters: &[Filter], separator: &str, top_level: bool) -> String {
    match filters {
        [] => String::new(),
        [single] => single.render_inner(top_level),
        _ => {
            let joined = filters
                .iter()
                .map(|f| f.render_inner(false))
                .collect::<Vec<_>>()
                .join(separator);
            if top_level {
                joined
            } else {
                format!("({})", joined)
            }
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_filter() -> Filter {
        Filter::any([
            Filter::eq("visibility", "public"),
            Filter::all([
                Filter::eq("visibility", "private"),
                Filter::eq("user", "u1"),
            ]),
        ])
        .and(Filter::any([
            Filter::like("name", "rust"),
            Filter::like("description", "rust"),
            Filter::like("tags", "rust"),
        ]))
    }

    #[test]
    fn test_render_nested() {
        assert_eq!(
            search_filter().render(),
            r#"(visibility = "public" || (visibility = "private" && user = "u1")) && (name ~ "rust" || description ~ "rust" || tags ~ "rust")"#
        );
    }

    #[test]
    fn test_render_single_and_top_level_any() {
        assert_eq!(Filter::eq("user", "u1").render(), r#"user = "u1""#);
        assert_eq!(
            Filter::any([Filter::eq("a", "1"), Filter::eq("b", "2")]).to_string(),
            r#"a = "1" || b = "2""#
        );
    }

    #[test]
    fn test_render_escapes_quotes() {
        assert_eq!(
            Filter::like("name", r#"say "hi" \o/"#).render(),
            r#"name ~ "say \"hi\" \\o/""#
        );
    }

    #[test]
    fn test_matches_records() {
        let filter = search_filter();

        let public = json!({"visibility": "public", "user": "u2", "name": "Learning Rust", "description": "", "tags": []});
        let own_private = json!({"visibility": "private", "user": "u1", "name": "x", "description": "", "tags": ["RUST"]});
        let foreign_private = json!({"visibility": "private", "user": "u2", "name": "Rust", "description": "", "tags": []});
        let unrelated = json!({"visibility": "public", "user": "u2", "name": "Go", "description": "", "tags": ["go"]});

        assert!(filter.matches(&public));
        assert!(filter.matches(&own_private));
        assert!(!filter.matches(&foreign_private));
        assert!(!filter.matches(&unrelated));
    }
}
