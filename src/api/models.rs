use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Email as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier for the email
    pub id: String,

    pub subject: String,

    /// Sender address
    pub sender: String,

    /// Recipient address
    #[serde(default)]
    pub recipient: String,

    /// Plain text body
    pub content: String,

    /// When the email was received, as sent by the backend (ISO 8601)
    pub timestamp: String,

    /// Label assigned by the classifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub is_interested: bool,
}

impl Email {
    /// Create an unclassified email
    pub fn new(id: &str, subject: &str, sender: &str, content: &str, timestamp: &str) -> Self {
        Self {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            recipient: String::new(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
            category: None,
            is_interested: false,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_recipient(mut self, recipient: &str) -> Self {
        self.recipient = recipient.to_string();
        self
    }

    pub fn interested(mut self, is_interested: bool) -> Self {
        self.is_interested = is_interested;
        self
    }

    /// The timestamp as a date, if it can be parsed
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parse the timestamp formats the backend produces.
///
/// Accepts RFC 3339, RFC 2822 (raw IMAP `Date` headers), naive ISO 8601
/// (assumed UTC) and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// One page of the inbox list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EmailPageWire")]
pub struct EmailPage {
    pub total: u64,
    pub emails: Vec<Email>,
}

// The backend answers with a bare list; newer builds wrap it with a total.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmailPageWire {
    List(Vec<Email>),
    Page {
        total: Option<u64>,
        emails: Vec<Email>,
    },
}

impl From<EmailPageWire> for EmailPage {
    fn from(wire: EmailPageWire) -> Self {
        match wire {
            EmailPageWire::List(emails) => Self {
                total: emails.len() as u64,
                emails,
            },
            EmailPageWire::Page { total, emails } => Self {
                total: total.unwrap_or(emails.len() as u64),
                emails,
            },
        }
    }
}

/// Parameters of the inbox list read. Also the variable part of its cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailListParams {
    pub page: u32,
    pub size: u32,
    pub query: Option<String>,
    pub category: Option<String>,
    /// Only emails with this interest flag
    #[serde(default)]
    pub is_interested: Option<bool>,
}

impl EmailListParams {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            query: None,
            category: None,
            is_interested: None,
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        let query = query.trim();
        self.query = if query.is_empty() {
            None
        } else {
            Some(query.to_string())
        };
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_interested(mut self, is_interested: bool) -> Self {
        self.is_interested = Some(is_interested);
        self
    }
}

impl Default for EmailListParams {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

/// Answer of `POST /sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub count: Option<u64>,
}

/// Generic `{status, message}` answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

/// Body of `POST /mark-interested`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkInterestedRequest {
    pub email_id: String,
    pub interested: bool,
}

/// One reply suggested for an email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SuggestedReplyWire")]
pub struct SuggestedReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestedReplyWire {
    Text(String),
    Scored {
        text: String,
        #[serde(default)]
        confidence: Option<f64>,
    },
}

impl From<SuggestedReplyWire> for SuggestedReply {
    fn from(wire: SuggestedReplyWire) -> Self {
        match wire {
            SuggestedReplyWire::Text(text) => Self {
                text,
                confidence: None,
            },
            SuggestedReplyWire::Scored { text, confidence } => Self { text, confidence },
        }
    }
}

/// Answer of `POST /suggest-replies/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionsResponse {
    #[serde(default)]
    pub suggestions: Vec<SuggestedReply>,
}

/// Answer of the `GET /` health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

/// Labels produced by the backend classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Interested,
    MeetingBooked,
    NotInterested,
    Spam,
    OutOfOffice,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Interested,
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
        }
    }

    /// Case-insensitive lookup; `-` and `_` may stand in for spaces
    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim().replace(['-', '_'], " ").to_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().to_lowercase() == wanted)
    }

    /// Canonical spelling of a known label, anything else unchanged
    pub fn normalize(label: &str) -> String {
        Category::from_str(label)
            .map(|category| category.as_str().to_string())
            .unwrap_or_else(|| label.to_string())
    }
}
