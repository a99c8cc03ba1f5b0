use serde::Serialize;

use super::{SearchField, SearchFilters};

/// One whitespace-separated piece of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchToken {
    /// Plain word matched as free text
    Text { value: String },
    /// `field:value` on a searchable field
    Field { field: SearchField, value: String },
}

/// Tokenized view of a query string.
///
/// Advisory only: filtering reads the raw query and the filter state
/// directly, this is what a UI shows as chips or hints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSearch {
    pub query: String,
    pub tokens: Vec<SearchToken>,
    /// `base` filters with the `field:value` tokens applied on top
    pub filters: SearchFilters,
}

impl ParsedSearch {
    /// The plain words joined back together
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .filter_map(|token| match token {
                SearchToken::Text { value } => Some(value.as_str()),
                SearchToken::Field { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split `query` on whitespace and recognise `field:value` tokens.
///
/// Only the fields in [`SearchField::ALL`] are recognised; `to:bob` or
/// `subject:` (no value) stay plain text. Subject, sender and category
/// tokens also land in the returned filters; content has no filter slot.
pub fn parse_search(query: &str, base: &SearchFilters) -> ParsedSearch {
    let mut filters = base.clone();
    let tokens = query
        .split_whitespace()
        .map(|word| match split_field(word) {
            Some((field, value)) => {
                match field {
                    SearchField::Subject => filters.subject = Some(value.to_string()),
                    SearchField::Sender => filters.sender = Some(value.to_string()),
                    SearchField::Category => filters.category = Some(value.to_string()),
                    SearchField::Content => {}
                }
                SearchToken::Field {
                    field,
                    value: value.to_string(),
                }
            }
            None => SearchToken::Text {
                value: word.to_string(),
            },
        })
        .collect();

    ParsedSearch {
        query: query.to_string(),
        tokens,
        filters,
    }
}

fn split_field(word: &str) -> Option<(SearchField, &str)> {
    let (name, value) = word.split_once(':')?;
    if value.is_empty() {
        return None;
    }
    SearchField::from_str(name).map(|field| (field, value))
}
