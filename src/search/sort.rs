use std::cmp::Ordering;

use super::{SortConfig, SortDirection, SortField};
use crate::api::models::Email;

/// Stable in-place sort; equal emails keep their relative order in both directions
pub fn sort_emails(emails: &mut [Email], config: &SortConfig) {
    emails.sort_by(|a, b| {
        let ordering = compare(a, b, config.field);
        match config.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare(a: &Email, b: &Email, field: SortField) -> Ordering {
    match field {
        SortField::Timestamp => match (a.received_at(), b.received_at()) {
            (Some(x), Some(y)) => x.cmp(&y),
            // Unparseable timestamps sort before real ones
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => a.timestamp.cmp(&b.timestamp),
        },
        SortField::Subject => a.subject.cmp(&b.subject),
        SortField::Sender => a.sender.cmp(&b.sender),
        SortField::Recipient => a.recipient.cmp(&b.recipient),
        SortField::Category => a.category.cmp(&b.category),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(emails: &[Email]) -> Vec<&str> {
        emails.iter().map(|e| e.id.as_str()).collect()
    }

    fn inbox() -> Vec<Email> {
        vec![
            Email::new("1", "beta", "b@x.io", "", "2024-03-02T00:00:00"),
            Email::new("2", "alpha", "a@x.io", "", "2024-03-03T00:00:00+01:00"),
            Email::new("3", "beta", "c@x.io", "", "2024-03-01T00:00:00Z"),
        ]
    }

    #[test]
    fn test_sort_by_subject_is_stable() {
        let mut emails = inbox();
        sort_emails(
            &mut emails,
            &SortConfig {
                field: SortField::Subject,
                direction: SortDirection::Asc,
            },
        );
        assert_eq!(ids(&emails), vec!["2", "1", "3"]);

        let mut emails = inbox();
        sort_emails(
            &mut emails,
            &SortConfig {
                field: SortField::Subject,
                direction: SortDirection::Desc,
            },
        );
        // The two "beta" emails keep their input order
        assert_eq!(ids(&emails), vec!["1", "3", "2"]);
    }

    #[test]
    fn test_sort_by_timestamp_compares_dates() {
        let mut emails = inbox();
        sort_emails(&mut emails, &SortConfig::default());
        assert_eq!(ids(&emails), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_unparseable_timestamps_sort_first() {
        let mut emails = inbox();
        emails.push(Email::new("4", "gamma", "d@x.io", "", "unknown"));
        sort_emails(
            &mut emails,
            &SortConfig {
                field: SortField::Timestamp,
                direction: SortDirection::Asc,
            },
        );
        assert_eq!(ids(&emails), vec!["4", "3", "1", "2"]);
    }

    #[test]
    fn test_missing_category_sorts_first() {
        let mut emails = vec![
            Email::new("1", "", "", "", "").with_category("Spam"),
            Email::new("2", "", "", "", ""),
            Email::new("3", "", "", "", "").with_category("Interested"),
        ];
        sort_emails(
            &mut emails,
            &SortConfig {
                field: SortField::Category,
                direction: SortDirection::Asc,
            },
        );
        assert_eq!(ids(&emails), vec!["2", "3", "1"]);
    }
}
