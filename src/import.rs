//! Legacy link import
//!
//! Reads the `links` table of a MySQL dump produced by the previous LinkSync
//! version. Only `INSERT INTO `links`` statements are looked at; rows are
//! expected in the column order
//! `id, url, name, description, tags, username, email, added_date, visibility, clicks`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{parse_tags, LinkFormData, Visibility};

static INSERT_LINKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)INSERT\s+INTO\s+`?links`?\s*(?:\([^)]*\))?\s*VALUES\s*(.+?);\s*(?:\n|$)")
        .expect("static regex")
});

const COLUMNS: usize = 10;

/// One row of the legacy `links` table
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyLink {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub added_date: String,
    pub visibility: Visibility,
    pub clicks: i64,
}

impl LegacyLink {
    fn from_fields(fields: Vec<Option<String>>) -> Option<Self> {
        if fields.len() != COLUMNS {
            return None;
        }
        let mut fields = fields.into_iter();
        let mut next = || fields.next().flatten();

        let id = next()?.trim().parse().ok()?;
        let url = next()?;
        let name = next().unwrap_or_default();
        let description = next().unwrap_or_default();
        let tags = parse_tags(&next().unwrap_or_default());
        let username = next();
        let email = next();
        let added_date = next().unwrap_or_default();
        let visibility = next()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let clicks = next().and_then(|c| c.trim().parse().ok()).unwrap_or(0);

        Some(Self {
            id,
            url,
            name,
            description,
            tags,
            username,
            email,
            added_date,
            visibility,
            clicks,
        })
    }

    /// Form data for re-creating this link under the current user
    pub fn to_form(&self) -> LinkFormData {
        LinkFormData::new(self.url.clone(), self.name.clone())
            .with_description(self.description.clone())
            .with_tags(self.tags.join(","))
            .with_visibility(self.visibility)
    }
}

/// Split the VALUES list of an INSERT into rows of fields.
///
/// `NULL` becomes `None`. Quoted values understand backslash escapes and
/// doubled quotes.
fn split_rows(values: &str) -> Vec<Vec<Option<String>>> {
    let mut rows = Vec::new();
    let mut chars = values.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '(' {
            continue;
        }

        let mut row = Vec::new();
        let mut bare = String::new();
        let mut quoted: Option<String> = None;

        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    let mut value = String::new();
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' => match chars.next() {
                                Some('n') => value.push('\n'),
                                Some('r') => value.push('\r'),
                                Some('t') => value.push('\t'),
                                Some('0') => value.push('\0'),
                                Some(other) => value.push(other),
                                None => break,
                            },
                            '\'' if chars.peek() == Some(&'\'') => {
                                chars.next();
                                value.push('\'');
                            }
                            '\'' => break,
                            other => value.push(other),
                        }
                    }
                    quoted = Some(value);
                }
                ',' | ')' => {
                    let field = match quoted.take() {
                        Some(value) => Some(value),
                        None => {
                            let token = bare.trim();
                            if token.eq_ignore_ascii_case("NULL") {
                                None
                            } else {
                                Some(token.to_string())
                            }
                        }
                    };
                    bare.clear();
                    row.push(field);
                    if c == ')' {
                        break;
                    }
                }
                other => bare.push(other),
            }
        }

        rows.push(row);
    }

    rows
}

/// Extract every legacy link from a SQL dump.
///
/// Rows that do not have the expected shape are logged and skipped.
pub fn parse_sql_dump(sql: &str) -> Vec<LegacyLink> {
    let mut links = Vec::new();

    for statement in INSERT_LINKS.captures_iter(sql) {
        for fields in split_rows(&statement[1]) {
            match LegacyLink::from_fields(fields.clone()) {
                Some(link) => links.push(link),
                None => tracing::warn!("Skipping malformed row with {} fields", fields.len()),
            }
        }
    }

    if links.is_empty() {
        tracing::warn!("No link entries found in the SQL dump");
    } else {
        tracing::info!("Parsed {} links from SQL dump", links.len());
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"
-- Dumping data for table `links`
CREATE TABLE `links` (`id` int(11) NOT NULL);

INSERT INTO `links` (`id`, `url`, `name`, `description`, `tags`, `username`, `email`, `added_date`, `visibility`, `clicks`) VALUES
(1, 'https://example.com', 'Example', 'An example site', 'work, reading,, work', 'ada', 'ada@example.com', '2023-01-05 10:00:00', 'public', 12),
(2, 'https://rust-lang.org', 'Rust (lang)', 'It\'s fast; really', '', NULL, NULL, '2023-02-01 08:30:00', 'private', 0);

INSERT INTO `users` (`id`, `name`) VALUES (1, 'ada');
"#;

    #[test]
    fn test_parse_rows() {
        let links = parse_sql_dump(DUMP);
        assert_eq!(links.len(), 2);

        let first = &links[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.url, "https://example.com");
        assert_eq!(first.tags, vec!["work", "reading", "work"]);
        assert_eq!(first.username.as_deref(), Some("ada"));
        assert_eq!(first.visibility, Visibility::Public);
        assert_eq!(first.clicks, 12);

        let second = &links[1];
        assert_eq!(second.name, "Rust (lang)");
        assert_eq!(second.description, "It's fast; really");
        assert!(second.tags.is_empty());
        assert!(second.username.is_none());
        assert!(second.email.is_none());
        assert_eq!(second.visibility, Visibility::Private);
    }

    #[test]
    fn test_other_tables_and_bad_rows_are_ignored() {
        let sql = "INSERT INTO `links` VALUES (1, 'https://a.example'), \
                   (2, 'https://b.example', 'B', '', '', NULL, NULL, '', 'public', 3);\n\
                   INSERT INTO `tags` VALUES (1, 'x');";
        let links = parse_sql_dump(sql);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://b.example");
    }

    #[test]
    fn test_doubled_quotes_and_empty_dump() {
        let rows = split_rows("(3, 'O''Reilly', NULL)");
        assert_eq!(
            rows,
            vec![vec![
                Some("3".to_string()),
                Some("O'Reilly".to_string()),
                None
            ]]
        );
        assert!(parse_sql_dump("SELECT 1;").is_empty());
    }

    #[test]
    fn test_to_form() {
        let link = parse_sql_dump(DUMP).remove(0);
        let form = link.to_form();
        assert_eq!(form.tags, "work,reading,work");
        assert_eq!(form.tag_list(), link.tags);
        assert_eq!(form.description, "An example site");
    }
}
