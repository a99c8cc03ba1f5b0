//! Client-side search over the emails already loaded by the query layer.
//!
//! Free text is matched against a fixed set of fields, structured filters
//! narrow the result further and a stable sort orders what is left. The
//! [`SearchSession`] debounces typing so the result list is recomputed once
//! per pause rather than once per keystroke. Nothing here performs I/O and
//! nothing here fails: unusable filter values simply match nothing.

pub mod filter;
pub mod parser;
pub mod session;
pub mod sort;

use serde::{Deserialize, Serialize};

use crate::api::models::Email;

pub use filter::{filter_emails, is_search_active};
pub use parser::{parse_search, ParsedSearch, SearchToken};
pub use session::{SearchPhase, SearchSession};
pub use sort::sort_emails;

/// Fields the free-text query is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Subject,
    Sender,
    Content,
    Category,
}

impl SearchField {
    /// Every searchable field. Text matching and `field:value` parsing both
    /// go through this list.
    pub const ALL: [SearchField; 4] = [
        SearchField::Subject,
        SearchField::Sender,
        SearchField::Content,
        SearchField::Category,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Subject => "subject",
            SearchField::Sender => "sender",
            SearchField::Content => "content",
            SearchField::Category => "category",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        SearchField::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(s))
    }

    /// The email's value for this field, if it has one
    pub fn value_of<'a>(&self, email: &'a Email) -> Option<&'a str> {
        match self {
            SearchField::Subject => Some(&email.subject),
            SearchField::Sender => Some(&email.sender),
            SearchField::Content => Some(&email.content),
            SearchField::Category => email.category.as_deref(),
        }
    }
}

/// Structured filters; every `None` (or empty string) is ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub is_interested: Option<bool>,
    /// Inclusive lower bound on the timestamp
    pub start_date: Option<String>,
    /// Inclusive upper bound on the timestamp; a bare date covers the whole day
    pub end_date: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.is_empty()).unwrap_or(false)
}

impl SearchFilters {
    /// True when at least one filter would narrow the results
    pub fn has_any(&self) -> bool {
        is_set(&self.category)
            || self.is_interested.is_some()
            || is_set(&self.start_date)
            || is_set(&self.end_date)
            || is_set(&self.sender)
            || is_set(&self.subject)
    }
}

/// Sortable email fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Timestamp,
    Subject,
    Sender,
    Recipient,
    Category,
}

impl SortField {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "timestamp" | "date" => Some(SortField::Timestamp),
            "subject" => Some(SortField::Subject),
            "sender" | "from" => Some(SortField::Sender),
            "recipient" | "to" => Some(SortField::Recipient),
            "category" => Some(SortField::Category),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    /// Newest first
    fn default() -> Self {
        Self {
            field: SortField::Timestamp,
            direction: SortDirection::Desc,
        }
    }
}

impl SortConfig {
    /// Selecting the active field flips the direction, any other field
    /// starts ascending.
    pub fn toggle(self, field: SortField) -> Self {
        if self.field == field {
            Self {
                field,
                direction: self.direction.flipped(),
            }
        } else {
            Self {
                field,
                direction: SortDirection::Asc,
            }
        }
    }
}

/// State of one search session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    /// Raw query as typed
    pub query: String,
    pub filters: SearchFilters,
    pub sort_config: SortConfig,
    /// A query change is waiting for the debounce delay
    pub is_searching: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_same_field_flips_direction() {
        let config = SortConfig::default().toggle(SortField::Subject);
        assert_eq!(config.field, SortField::Subject);
        assert_eq!(config.direction, SortDirection::Asc);

        let config = config.toggle(SortField::Subject);
        assert_eq!(config.field, SortField::Subject);
        assert_eq!(config.direction, SortDirection::Desc);

        let config = config.toggle(SortField::Sender);
        assert_eq!(config.direction, SortDirection::Asc);
    }

    #[test]
    fn test_empty_strings_are_not_filters() {
        let mut filters = SearchFilters::default();
        assert!(!filters.has_any());
        filters.sender = Some(String::new());
        assert!(!filters.has_any());
        filters.is_interested = Some(false);
        assert!(filters.has_any());
    }

    #[test]
    fn test_field_lookup() {
        assert_eq!(SearchField::from_str("Subject"), Some(SearchField::Subject));
        assert_eq!(SearchField::from_str("recipient"), None);
        assert_eq!(SortField::from_str("date"), Some(SortField::Timestamp));
        assert_eq!(SortField::from_str("size"), None);
    }
}
