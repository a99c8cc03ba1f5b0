//! Declarative reads ("queries") and writes ("mutations") on top of the
//! fetch cache.
//!
//! A [`Query`] names a cache slot and knows how to fill it; the
//! [`QueryClient`] decides whether the fetcher actually has to run:
//!
//! - fresh entry (younger than `stale_time`): served, no fetch
//! - stale entry (younger than `cache_time`): served, refetched in the background
//! - missing or expired entry: fetched and awaited
//!
//! Concurrent reads of one key share a single in-flight fetch. A
//! [`Mutation`] runs a write and then invalidates the keys it affects.

pub mod client;
pub mod mutation;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::QueryKey;
use crate::error::{QueryError, Result};

pub use client::{QueryClient, QueryObserver};
pub use mutation::{Mutation, MutationState};

pub(crate) type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Describes one read: where its result is cached and how to produce it.
///
/// Timing and retry fields left at `None` fall back to the client defaults.
pub struct Query<T> {
    pub key: QueryKey,
    pub stale_time: Option<Duration>,
    pub cache_time: Option<Duration>,
    pub retry: Option<u32>,
    pub enabled: bool,
    fetcher: Fetcher<T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            stale_time: self.stale_time,
            cache_time: self.cache_time,
            retry: self.retry,
            enabled: self.enabled,
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    pub fn new<F, Fut>(key: QueryKey, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key,
            stale_time: None,
            cache_time: None,
            retry: None,
            enabled: true,
            fetcher: Arc::new(move || fetcher().boxed()),
        }
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn fetcher(&self) -> Fetcher<T> {
        self.fetcher.clone()
    }
}

/// Where the data of a [`QueryResult`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOrigin {
    /// The query is disabled; nothing was read or fetched
    Disabled,
    /// Served from cache, no fetch needed
    Fresh,
    /// Served from cache while a background refetch runs
    Stale,
    /// Fetched from the collaborator
    Fetched,
    /// The fetch was superseded or cancelled; `data` is whatever the cache holds
    Cancelled,
    /// The fetch failed; see `error`
    Failed,
}

/// Outcome of a read
#[derive(Debug)]
pub struct QueryResult<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub origin: ResultOrigin,
}

impl<T> Clone for QueryResult<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            origin: self.origin,
        }
    }
}

impl<T> QueryResult<T> {
    pub(crate) fn new(data: Option<Arc<T>>, error: Option<QueryError>, origin: ResultOrigin) -> Self {
        Self {
            data,
            error,
            origin,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }

    /// Data if any, otherwise the error. A read that produced neither
    /// (disabled or cancelled) reports [`QueryError::Cancelled`].
    pub fn into_result(self) -> Result<Arc<T>> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => Err(err),
            (None, None) => Err(QueryError::Cancelled),
        }
    }
}

/// Lifecycle of a cache slot as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Never fetched
    #[default]
    Idle,
    /// First fetch in progress, no data yet
    Loading,
    Success,
    Error,
}

/// Loading and error flags recorded for one key
#[derive(Debug, Clone, Default)]
pub struct QuerySnapshot {
    pub status: QueryStatus,
    /// A fetch (cold or background) is in flight
    pub is_fetching: bool,
    /// Last failure; cleared by the next successful fetch
    pub error: Option<QueryError>,
    pub data_updated_at: Option<Instant>,
    pub observers: usize,
}

impl QuerySnapshot {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

/// Notifications published by the client
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// New data was written to the cache for this key
    Updated(QueryKey),
    /// A mutation invalidated this key
    Invalidated(QueryKey),
    /// A fetch failed; cached data, if any, was kept
    FetchFailed { key: QueryKey, error: QueryError },
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at 30 seconds
pub(crate) fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(base, 10), Duration::from_secs(30));
    }

    #[test]
    fn test_into_result() {
        let ok: QueryResult<u32> = QueryResult::new(Some(Arc::new(1)), None, ResultOrigin::Fresh);
        assert_eq!(*ok.into_result().unwrap(), 1);

        let failed: QueryResult<u32> = QueryResult::new(
            None,
            Some(QueryError::Transient("down".to_string())),
            ResultOrigin::Failed,
        );
        assert!(matches!(failed.into_result(), Err(QueryError::Transient(_))));

        let disabled: QueryResult<u32> = QueryResult::new(None, None, ResultOrigin::Disabled);
        assert_eq!(disabled.into_result().unwrap_err(), QueryError::Cancelled);
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new(QueryKey::root("emails"), || async { Ok(1u32) })
            .stale_time(Duration::from_secs(1))
            .cache_time(Duration::from_secs(2))
            .retry(0)
            .enabled(false);
        assert_eq!(query.stale_time, Some(Duration::from_secs(1)));
        assert_eq!(query.cache_time, Some(Duration::from_secs(2)));
        assert_eq!(query.retry, Some(0));
        assert!(!query.enabled);
    }
}
