use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use super::{SearchField, SearchFilters};
use crate::api::models::{parse_timestamp, Email};

/// A search narrows results only if the query is long enough or a filter is set.
/// Length is counted in chars after trimming, so `"  a "` is one char long.
pub fn is_search_active(query: &str, filters: &SearchFilters, min_query_length: usize) -> bool {
    query.trim().chars().count() >= min_query_length || filters.has_any()
}

/// Emails matching both the free-text query and the filters, in input order.
///
/// When the search is not active the input comes back unchanged.
pub fn filter_emails(
    emails: &[Email],
    query: &str,
    filters: &SearchFilters,
    min_query_length: usize,
) -> Vec<Email> {
    if !is_search_active(query, filters, min_query_length) {
        return emails.to_vec();
    }

    let needle = query.trim().to_lowercase();
    let bounds = DateBounds::from_filters(filters);
    emails
        .iter()
        .filter(|email| matches_text(email, &needle) && matches_filters(email, filters, &bounds))
        .cloned()
        .collect()
}

/// Case-insensitive substring match on any searchable field.
/// `needle` must already be lowercase; an empty needle matches everything.
fn matches_text(email: &Email, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    SearchField::ALL.iter().any(|field| {
        field
            .value_of(email)
            .map(|value| value.to_lowercase().contains(needle))
            .unwrap_or(false)
    })
}

fn matches_filters(email: &Email, filters: &SearchFilters, bounds: &DateBounds) -> bool {
    exact(&filters.category, email.category.as_deref())
        && exact(&filters.sender, Some(&email.sender))
        && exact(&filters.subject, Some(&email.subject))
        && filters
            .is_interested
            .map(|wanted| email.is_interested == wanted)
            .unwrap_or(true)
        && bounds.contains(email)
}

fn exact(filter: &Option<String>, value: Option<&str>) -> bool {
    match filter.as_deref() {
        None | Some("") => true,
        Some(wanted) => value == Some(wanted),
    }
}

/// Parsed date filters. A bound that does not parse matches nothing.
struct DateBounds {
    start: Option<Option<DateTime<Utc>>>,
    end: Option<Option<DateTime<Utc>>>,
}

impl DateBounds {
    fn from_filters(filters: &SearchFilters) -> Self {
        let bound = |raw: &Option<String>, end_of_day: bool| {
            raw.as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse_bound(s, end_of_day))
        };
        Self {
            start: bound(&filters.start_date, false),
            end: bound(&filters.end_date, true),
        }
    }

    fn contains(&self, email: &Email) -> bool {
        if self.start.is_none() && self.end.is_none() {
            return true;
        }
        let Some(received) = email.received_at() else {
            return false;
        };
        let after_start = match self.start {
            None => true,
            Some(Some(start)) => received >= start,
            Some(None) => false,
        };
        let before_end = match self.end {
            None => true,
            Some(Some(end)) => received <= end,
            Some(None) => false,
        };
        after_start && before_end
    }
}

// A bare date as upper bound means "until the end of that day"
fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if end_of_day {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return date
                .and_hms_nano_opt(23, 59, 59, 999_999_999)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    parse_timestamp(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox() -> Vec<Email> {
        vec![
            Email::new("1", "Partnership deal", "ceo@acme.io", "Let's work together", "2024-03-01T10:00:00")
                .with_category("Interested")
                .interested(true),
            Email::new("2", "Invoice", "billing@vendor.com", "Payment due", "2024-03-05T09:30:00")
                .with_category("Spam"),
            Email::new("3", "Team lunch", "hr@acme.io", "Friday at noon", "2024-03-10T12:00:00"),
        ]
    }

    fn ids(emails: &[Email]) -> Vec<&str> {
        emails.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_inactive_search_returns_input_unchanged() {
        let emails = inbox();
        let result = filter_emails(&emails, "", &SearchFilters::default(), 2);
        assert_eq!(result, emails);
    }

    #[test]
    fn test_short_query_alone_does_not_narrow() {
        let emails = inbox();
        let result = filter_emails(&emails, "x", &SearchFilters::default(), 2);
        assert_eq!(ids(&result), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_query_length_ignores_surrounding_whitespace() {
        let filters = SearchFilters::default();
        assert!(!is_search_active("  a  ", &filters, 2));
        assert!(is_search_active(" ab ", &filters, 2));
        assert!(is_search_active("é", &filters, 1));
    }

    #[test]
    fn test_case_insensitive_substring() {
        let result = filter_emails(&inbox(), "partner", &SearchFilters::default(), 2);
        assert_eq!(ids(&result), vec!["1"]);

        let result = filter_emails(&inbox(), "ACME", &SearchFilters::default(), 2);
        assert_eq!(ids(&result), vec!["1", "3"]);
    }

    #[test]
    fn test_query_matches_category_and_content() {
        let result = filter_emails(&inbox(), "spam", &SearchFilters::default(), 2);
        assert_eq!(ids(&result), vec!["2"]);

        let result = filter_emails(&inbox(), "friday", &SearchFilters::default(), 2);
        assert_eq!(ids(&result), vec!["3"]);
    }

    #[test]
    fn test_recipient_is_not_searched() {
        let emails = vec![Email::new("1", "Hi", "a@x.io", "", "2024-03-01").with_recipient("zed@onebox.dev")];
        let result = filter_emails(&emails, "zed", &SearchFilters::default(), 2);
        assert!(result.is_empty());
    }

    #[test]
    fn test_structured_filters_require_exact_match() {
        let filters = SearchFilters {
            sender: Some("ceo@acme.io".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_emails(&inbox(), "", &filters, 2)), vec!["1"]);

        let filters = SearchFilters {
            subject: Some("Invoice".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_emails(&inbox(), "", &filters, 2)), vec!["2"]);

        let filters = SearchFilters {
            category: Some("interested".to_string()),
            ..Default::default()
        };
        assert!(filter_emails(&inbox(), "", &filters, 2).is_empty());
    }

    #[test]
    fn test_text_and_filters_combine() {
        let filters = SearchFilters {
            is_interested: Some(false),
            ..Default::default()
        };
        assert_eq!(ids(&filter_emails(&inbox(), "acme", &filters, 2)), vec!["3"]);
        // A short query is still applied once a filter activates the search
        assert_eq!(ids(&filter_emails(&inbox(), "p", &filters, 2)), vec!["2"]);
    }

    #[test]
    fn test_date_bounds_are_inclusive() {
        let filters = SearchFilters {
            start_date: Some("2024-03-05T09:30:00".to_string()),
            end_date: Some("2024-03-10".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_emails(&inbox(), "", &filters, 2)), vec!["2", "3"]);

        let filters = SearchFilters {
            end_date: Some("2024-03-01".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter_emails(&inbox(), "", &filters, 2)), vec!["1"]);
    }

    #[test]
    fn test_malformed_values_match_nothing() {
        let filters = SearchFilters {
            start_date: Some("last tuesday".to_string()),
            ..Default::default()
        };
        assert!(filter_emails(&inbox(), "", &filters, 2).is_empty());

        let emails = vec![Email::new("1", "Hi", "a@x.io", "", "not a date")];
        let filters = SearchFilters {
            start_date: Some("2024-01-01".to_string()),
            ..Default::default()
        };
        assert!(filter_emails(&emails, "", &filters, 2).is_empty());
    }
}
