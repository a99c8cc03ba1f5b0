use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::{
    Email, EmailListParams, EmailPage, HealthStatus, MarkInterestedRequest, StatusResponse,
    SuggestedReply, SuggestionsResponse, SyncResponse,
};
use super::EmailApi;
use crate::error::{QueryError, Result};

/// Backend client speaking the onebox HTTP API
#[derive(Clone)]
pub struct HttpEmailApi {
    client: Client,
    base_url: String,
}

impl HttpEmailApi {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Validation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check that the backend is up
    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.client.get(self.url("/")).send().await?;
        decode(response).await
    }
}

/// Add `http://` when no scheme is given and drop trailing slashes
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

fn require_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(QueryError::Validation("Email id must not be empty".to_string()));
    }
    Ok(id)
}

/// Map the status code onto the error taxonomy, then decode the body
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(QueryError::from);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status));
    warn!("Backend answered {}: {}", status, detail);

    Err(match status {
        StatusCode::NOT_FOUND => QueryError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => QueryError::Transient(detail),
        s if s.is_server_error() => QueryError::Transient(detail),
        _ => QueryError::Validation(detail),
    })
}

// FastAPI reports errors as {"detail": "..."}; validation errors carry a list
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl EmailApi for HttpEmailApi {
    async fn fetch_emails(&self, params: &EmailListParams) -> Result<EmailPage> {
        if params.page == 0 || params.size == 0 {
            return Err(QueryError::Validation(
                "page and size must be greater than zero".to_string(),
            ));
        }

        let mut query = vec![
            ("page", params.page.to_string()),
            ("size", params.size.to_string()),
        ];
        if let Some(text) = params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            query.push(("query", text.to_string()));
        }
        if let Some(category) = &params.category {
            query.push(("categories", category.clone()));
        }
        if let Some(is_interested) = params.is_interested {
            query.push(("is_interested", is_interested.to_string()));
        }

        debug!("GET /emails page={} size={}", params.page, params.size);
        let response = self
            .client
            .get(self.url("/emails"))
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    async fn fetch_email(&self, id: &str) -> Result<Email> {
        let id = require_id(id)?;
        debug!("GET /email/{}", id);
        let response = self
            .client
            .get(self.url(&format!("/email/{}", id)))
            .send()
            .await?;
        decode(response).await
    }

    async fn sync_emails(&self) -> Result<SyncResponse> {
        debug!("POST /sync");
        let response = self.client.post(self.url("/sync")).send().await?;
        decode(response).await
    }

    async fn mark_interested(&self, id: &str, interested: bool) -> Result<StatusResponse> {
        let id = require_id(id)?;
        let body = MarkInterestedRequest {
            email_id: id.to_string(),
            interested,
        };
        debug!("POST /mark-interested {} -> {}", id, interested);
        let response = self
            .client
            .post(self.url("/mark-interested"))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn suggested_replies(&self, id: &str) -> Result<Vec<SuggestedReply>> {
        let id = require_id(id)?;
        debug!("POST /suggest-replies/{}", id);
        let response = self
            .client
            .post(self.url(&format!("/suggest-replies/{}", id)))
            .send()
            .await?;
        let body: SuggestionsResponse = decode(response).await?;
        Ok(body.suggestions)
    }
}
