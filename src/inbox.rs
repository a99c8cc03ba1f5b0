//! The backend reads and writes bound to the query layer.
//!
//! Key families:
//!
//! - `["emails", {page, size, query, category, is_interested}]`: inbox pages
//! - `["email", id]`: one email
//! - `["suggested-replies", id]`: reply suggestions, never invalidated by writes

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::api::models::{
    Email, EmailListParams, EmailPage, StatusResponse, SuggestedReply, SyncResponse,
};
use crate::api::EmailApi;
use crate::cache::QueryKey;
use crate::error::Result;
use crate::query::{Mutation, Query, QueryClient, QueryResult};

/// Prefix of every inbox page key
pub fn emails_root() -> QueryKey {
    QueryKey::root("emails")
}

pub fn emails_key(params: &EmailListParams) -> QueryKey {
    emails_root().with(json!({
        "page": params.page,
        "size": params.size,
        "query": params.query,
        "category": params.category,
        "is_interested": params.is_interested,
    }))
}

pub fn email_key(id: &str) -> QueryKey {
    QueryKey::root("email").with(id)
}

pub fn replies_key(id: &str) -> QueryKey {
    QueryKey::root("suggested-replies").with(id)
}

/// Variables of the mark-interested write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkInterested {
    pub id: String,
    pub interested: bool,
}

/// Client-side view of the inbox: cached reads plus the writes that
/// invalidate them
#[derive(Clone)]
pub struct Inbox {
    client: QueryClient,
    api: Arc<dyn EmailApi>,
}

impl Inbox {
    pub fn new(client: QueryClient, api: Arc<dyn EmailApi>) -> Self {
        Self { client, api }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn emails_query(&self, params: &EmailListParams) -> Query<EmailPage> {
        let api = self.api.clone();
        let owned = params.clone();
        Query::new(emails_key(params), move || {
            let api = api.clone();
            let params = owned.clone();
            async move { api.fetch_emails(&params).await }
        })
    }

    /// Disabled for an empty id, like a detail view with nothing selected
    pub fn email_query(&self, id: &str) -> Query<Email> {
        let api = self.api.clone();
        let owned = id.to_string();
        Query::new(email_key(id), move || {
            let api = api.clone();
            let id = owned.clone();
            async move { api.fetch_email(&id).await }
        })
        .enabled(!id.is_empty())
    }

    pub fn replies_query(&self, id: &str) -> Query<Vec<SuggestedReply>> {
        let api = self.api.clone();
        let owned = id.to_string();
        Query::new(replies_key(id), move || {
            let api = api.clone();
            let id = owned.clone();
            async move { api.suggested_replies(&id).await }
        })
        .enabled(!id.is_empty())
    }

    /// Pulls new mail on the backend, then drops every cached inbox page
    pub fn sync_mutation(&self) -> Mutation<(), SyncResponse> {
        let api = self.api.clone();
        Mutation::new(&self.client, move |()| {
            let api = api.clone();
            async move { api.sync_emails().await }
        })
        .on_success(|response, _| info!("📥 Sync finished: {}", response.message))
        .invalidates(emails_root())
    }

    /// Flags an email, then drops it and every cached inbox page
    pub fn mark_interested_mutation(&self) -> Mutation<MarkInterested, StatusResponse> {
        let api = self.api.clone();
        Mutation::new(&self.client, move |vars: MarkInterested| {
            let api = api.clone();
            async move { api.mark_interested(&vars.id, vars.interested).await }
        })
        .invalidates(emails_root())
        .invalidates_for(|vars| vec![email_key(&vars.id)])
    }

    pub async fn emails(&self, params: &EmailListParams) -> QueryResult<EmailPage> {
        self.client.query(&self.emails_query(params)).await
    }

    pub async fn email(&self, id: &str) -> QueryResult<Email> {
        self.client.query(&self.email_query(id)).await
    }

    pub async fn suggested_replies(&self, id: &str) -> QueryResult<Vec<SuggestedReply>> {
        self.client.query(&self.replies_query(id)).await
    }

    /// Refetch a page regardless of freshness
    pub async fn refresh(&self, params: &EmailListParams) -> QueryResult<EmailPage> {
        self.client.refetch(&self.emails_query(params)).await
    }

    pub async fn sync(&self) -> Result<Arc<SyncResponse>> {
        self.sync_mutation().mutate(()).await
    }

    pub async fn mark_interested(&self, id: &str, interested: bool) -> Result<Arc<StatusResponse>> {
        self.mark_interested_mutation()
            .mutate(MarkInterested {
                id: id.to_string(),
                interested,
            })
            .await
    }
}
