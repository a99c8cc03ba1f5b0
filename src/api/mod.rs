pub mod http;
pub mod models;

use async_trait::async_trait;

use crate::error::Result;
use models::{EmailListParams, EmailPage, Email, StatusResponse, SuggestedReply, SyncResponse};

pub use http::HttpEmailApi;

/// Trait defining the backend the client talks to
/// This allows swapping the HTTP implementation for a fake in tests
#[async_trait]
pub trait EmailApi: Send + Sync {
    /// Fetch one page of the inbox, optionally filtered server-side
    async fn fetch_emails(&self, params: &EmailListParams) -> Result<EmailPage>;

    /// Fetch a single email by its ID
    async fn fetch_email(&self, id: &str) -> Result<Email>;

    /// Ask the backend to pull new mail from IMAP
    async fn sync_emails(&self) -> Result<SyncResponse>;

    /// Flag an email as interesting (or not)
    async fn mark_interested(&self, id: &str, interested: bool) -> Result<StatusResponse>;

    /// Reply suggestions generated for an email
    async fn suggested_replies(&self, id: &str) -> Result<Vec<SuggestedReply>>;
}
