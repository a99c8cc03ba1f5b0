use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    retry_delay, Fetcher, Query, QueryEvent, QueryResult, QuerySnapshot, QueryStatus,
    ResultOrigin,
};
use crate::cache::{FetchCache, QueryKey};
use crate::config::QueryDefaults;
use crate::error::{QueryError, Result};

type AnyData = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<AnyData>>>;

/// A fetch currently running for one key
struct InFlight {
    seq: u64,
    token: CancellationToken,
    fetch: SharedFetch,
}

/// Per-key bookkeeping next to the cached data
#[derive(Default)]
struct KeyState {
    /// Sequence number of the newest write applied to the cache
    applied_seq: u64,
    /// Newest in-flight fetch cancelled by an invalidation; its waiters refetch
    invalidated_seq: u64,
    observers: usize,
    status: QueryStatus,
    error: Option<QueryError>,
    data_updated_at: Option<Instant>,
    inflight: Option<InFlight>,
}

struct Inner {
    cache: Arc<FetchCache>,
    defaults: QueryDefaults,
    keys: Mutex<HashMap<QueryKey, KeyState>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<QueryEvent>,
}

/// Entry point of the query layer.
///
/// Cheap to clone; clones share the cache, the in-flight map and the event
/// channel. Locks are never held across an `.await`; the key map is always
/// locked before the cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    /// Create a client over `cache` with the given defaults
    pub fn new(cache: Arc<FetchCache>, defaults: QueryDefaults) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                cache,
                defaults,
                keys: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(1),
                events,
            }),
        }
    }

    fn keys(&self) -> MutexGuard<'_, HashMap<QueryKey, KeyState>> {
        self.inner
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: QueryEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub fn cache(&self) -> &Arc<FetchCache> {
        &self.inner.cache
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.inner.defaults
    }

    /// Receive [`QueryEvent`]s published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    /// Run a read following the fresh / stale / cold protocol.
    ///
    /// Errors never escape as panics or rejections: they come back in
    /// [`QueryResult::error`] and are recorded in the key's snapshot.
    pub async fn query<T: Send + Sync + 'static>(&self, query: &Query<T>) -> QueryResult<T> {
        if !query.enabled {
            return QueryResult::new(None, None, ResultOrigin::Disabled);
        }

        let stale_time = query.stale_time.unwrap_or(self.inner.defaults.stale_time);
        let cache_time = query.cache_time.unwrap_or(self.inner.defaults.cache_time);

        if let Some(entry) = self.inner.cache.get::<T>(&query.key) {
            if !entry.is_invalidated() && entry.is_fresh(stale_time) {
                debug!("Cache hit {}", query.key);
                return QueryResult::new(Some(entry.data), None, ResultOrigin::Fresh);
            }
            if entry.is_fresh(cache_time) {
                debug!("Serving stale {} while revalidating", query.key);
                let _ = self.start_fetch(query, false, false);
                return QueryResult::new(Some(entry.data), None, ResultOrigin::Stale);
            }
        }

        debug!("Cache miss {}", query.key);
        let (seq, fetch) = self.start_fetch(query, false, true);
        self.await_fetch(query, seq, fetch).await
    }

    /// Fetch `query` now, superseding any fetch already in flight for its key
    pub async fn refetch<T: Send + Sync + 'static>(&self, query: &Query<T>) -> QueryResult<T> {
        if !query.enabled {
            return QueryResult::new(None, None, ResultOrigin::Disabled);
        }
        let cold = self.inner.cache.get::<T>(&query.key).is_none();
        let (seq, fetch) = self.start_fetch(query, true, cold);
        self.await_fetch(query, seq, fetch).await
    }

    /// Convenience over [`query`](Self::query) for callers that only want data
    pub async fn fetch<T: Send + Sync + 'static>(&self, query: &Query<T>) -> Result<Arc<T>> {
        self.query(query).await.into_result()
    }

    async fn await_fetch<T: Send + Sync + 'static>(
        &self,
        query: &Query<T>,
        mut seq: u64,
        mut fetch: SharedFetch,
    ) -> QueryResult<T> {
        let key = &query.key;
        loop {
            match fetch.await {
                Ok(data) => {
                    return match data.downcast::<T>() {
                        Ok(data) => QueryResult::new(Some(data), None, ResultOrigin::Fetched),
                        Err(_) => QueryResult::new(
                            None,
                            Some(QueryError::TypeMismatch(key.to_string())),
                            ResultOrigin::Failed,
                        ),
                    };
                }
                Err(QueryError::Cancelled) => {
                    // Follow a newer fetch for the same key if one replaced ours
                    match self.inflight_after(key, seq) {
                        Some((next_seq, next)) => {
                            seq = next_seq;
                            fetch = next;
                        }
                        None if self.invalidated_since(key, seq) => {
                            // A write landed while we were fetching; read again
                            debug!("Fetch {} for {} invalidated, refetching", seq, key);
                            let cold = self.inner.cache.get::<T>(key).is_none();
                            let (next_seq, next) = self.start_fetch(query, false, cold);
                            seq = next_seq;
                            fetch = next;
                        }
                        None => {
                            let data = self.inner.cache.get::<T>(key).map(|entry| entry.data);
                            return QueryResult::new(data, None, ResultOrigin::Cancelled);
                        }
                    }
                }
                Err(err) => return QueryResult::new(None, Some(err), ResultOrigin::Failed),
            }
        }
    }

    fn invalidated_since(&self, key: &QueryKey, seq: u64) -> bool {
        self.keys()
            .get(key)
            .map(|state| state.invalidated_seq >= seq)
            .unwrap_or(false)
    }

    fn inflight_after(&self, key: &QueryKey, seq: u64) -> Option<(u64, SharedFetch)> {
        let keys = self.keys();
        let inflight = keys.get(key)?.inflight.as_ref()?;
        if inflight.seq > seq && !inflight.token.is_cancelled() {
            Some((inflight.seq, inflight.fetch.clone()))
        } else {
            None
        }
    }

    /// Join the fetch in flight for the key, or start one.
    ///
    /// With `supersede` the running fetch is cancelled and a new one started.
    /// A `cold` fetch has no servable data behind it and reports `Loading`.
    fn start_fetch<T: Send + Sync + 'static>(
        &self,
        query: &Query<T>,
        supersede: bool,
        cold: bool,
    ) -> (u64, SharedFetch) {
        let mut keys = self.keys();
        let state = keys.entry(query.key.clone()).or_default();

        if let Some(inflight) = &state.inflight {
            if !inflight.token.is_cancelled() {
                if !supersede {
                    debug!("Joining in-flight fetch {} for {}", inflight.seq, query.key);
                    return (inflight.seq, inflight.fetch.clone());
                }
                debug!("Superseding fetch {} for {}", inflight.seq, query.key);
                inflight.token.cancel();
            }
        }

        let seq = self.next_seq();
        let token = CancellationToken::new();
        let fetch = self.fetch_task(
            query.key.clone(),
            query.fetcher(),
            query.retry.unwrap_or(self.inner.defaults.retry),
            seq,
            token.clone(),
        );

        if cold {
            state.status = QueryStatus::Loading;
        }
        state.inflight = Some(InFlight {
            seq,
            token,
            fetch: fetch.clone(),
        });
        drop(keys);

        // Drive the fetch to completion even if every caller stops waiting
        tokio::spawn(fetch.clone());
        (seq, fetch)
    }

    fn fetch_task<T: Send + Sync + 'static>(
        &self,
        key: QueryKey,
        fetcher: Fetcher<T>,
        retry: u32,
        seq: u64,
        token: CancellationToken,
    ) -> SharedFetch {
        let client = self.clone();
        let base_delay = self.inner.defaults.retry_delay;
        async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(QueryError::Cancelled),
                result = fetch_with_retry(&key, &fetcher, retry, base_delay) => {
                    result.map(|data| Arc::new(data) as AnyData)
                }
            };
            client.complete(&key, seq, &token, &outcome);
            outcome
        }
        .boxed()
        .shared()
    }

    /// Write a finished fetch back, unless it was cancelled or superseded
    fn complete(&self, key: &QueryKey, seq: u64, token: &CancellationToken, outcome: &Result<AnyData>) {
        let mut keys = self.keys();
        let state = keys.entry(key.clone()).or_default();
        if state.inflight.as_ref().map(|f| f.seq) == Some(seq) {
            state.inflight = None;
        }

        if token.is_cancelled() || matches!(outcome, Err(QueryError::Cancelled)) {
            debug!("Dropping cancelled fetch {} for {}", seq, key);
            if state.status == QueryStatus::Loading && state.inflight.is_none() {
                state.status = QueryStatus::Idle;
            }
            return;
        }
        if seq < state.applied_seq {
            debug!(
                "Dropping fetch {} for {}, newer write {} already applied",
                seq, key, state.applied_seq
            );
            return;
        }

        let event = match outcome {
            Ok(data) => {
                state.applied_seq = seq;
                state.status = QueryStatus::Success;
                state.error = None;
                state.data_updated_at = Some(Instant::now());
                self.inner.cache.set_any(key.clone(), data.clone());
                QueryEvent::Updated(key.clone())
            }
            Err(err) => {
                state.status = QueryStatus::Error;
                state.error = Some(err.clone());
                QueryEvent::FetchFailed {
                    key: key.clone(),
                    error: err.clone(),
                }
            }
        };
        drop(keys);
        self.emit(event);
    }

    /// Invalidate every key under `prefix`.
    ///
    /// Fetches already in flight are cancelled since they started before
    /// the write. Observed entries are kept but flagged for refetch; all
    /// others are removed. Returns the number of cache entries affected.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut keys = self.keys();
        for (key, state) in keys.iter_mut() {
            if key.starts_with(prefix) {
                if let Some(inflight) = state.inflight.take() {
                    debug!("Cancelling in-flight fetch {} for {}", inflight.seq, key);
                    inflight.token.cancel();
                    state.invalidated_seq = inflight.seq;
                }
            }
        }

        let affected = self.inner.cache.keys_matching(prefix);
        for key in &affected {
            let observed = keys.get(key).map(|s| s.observers > 0).unwrap_or(false);
            if observed {
                self.inner.cache.mark_invalidated(key);
            } else {
                self.inner.cache.delete(key);
            }
        }
        drop(keys);

        debug!("Invalidated {} entries under {}", affected.len(), prefix);
        for key in &affected {
            self.emit(QueryEvent::Invalidated(key.clone()));
        }
        affected.len()
    }

    /// Write data for `key` by hand. Any fetch for the key that is still in
    /// flight started earlier and will not overwrite this value.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: QueryKey, data: T) -> Arc<T> {
        let mut keys = self.keys();
        let seq = self.next_seq();
        let state = keys.entry(key.clone()).or_default();
        state.applied_seq = seq;
        state.status = QueryStatus::Success;
        state.error = None;
        state.data_updated_at = Some(Instant::now());
        let entry = self.inner.cache.set(key.clone(), data);
        drop(keys);
        self.emit(QueryEvent::Updated(key));
        entry.data
    }

    /// Cached data for `key`, without fetching
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.inner.cache.get::<T>(key).map(|entry| entry.data)
    }

    pub fn snapshot(&self, key: &QueryKey) -> QuerySnapshot {
        let keys = self.keys();
        match keys.get(key) {
            Some(state) => QuerySnapshot {
                status: state.status,
                is_fetching: state.inflight.is_some(),
                error: state.error.clone(),
                data_updated_at: state.data_updated_at,
                observers: state.observers,
            },
            None => QuerySnapshot::default(),
        }
    }

    /// Mark `key` as mounted until the returned guard is dropped
    pub fn observe(&self, key: QueryKey) -> QueryObserver {
        self.keys().entry(key.clone()).or_default().observers += 1;
        QueryObserver {
            client: self.clone(),
            key,
        }
    }

    fn release(&self, key: &QueryKey) {
        let mut keys = self.keys();
        if let Some(state) = keys.get_mut(key) {
            state.observers = state.observers.saturating_sub(1);
            if state.observers == 0 {
                if let Some(inflight) = state.inflight.take() {
                    debug!("Last observer of {} left, cancelling fetch {}", key, inflight.seq);
                    inflight.token.cancel();
                }
            }
        }
    }

    /// Drop cache entries older than the default cache time, along with
    /// the bookkeeping of keys that are no longer cached, observed or fetched
    pub fn gc(&self) -> usize {
        let mut keys = self.keys();
        let pruned = self.inner.cache.prune(self.inner.defaults.cache_time);
        keys.retain(|key, state| {
            state.observers > 0 || state.inflight.is_some() || self.inner.cache.contains(key)
        });
        pruned
    }

    /// Cancel everything in flight and empty the cache
    pub fn clear(&self) {
        let mut keys = self.keys();
        for state in keys.values_mut() {
            if let Some(inflight) = state.inflight.take() {
                inflight.token.cancel();
            }
        }
        keys.clear();
        self.inner.cache.clear();
    }
}

async fn fetch_with_retry<T>(
    key: &QueryKey,
    fetcher: &Fetcher<T>,
    retry: u32,
    base_delay: Duration,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(data) => return Ok(data),
            Err(err) if err.is_retryable() && attempt < retry => {
                attempt += 1;
                let delay = retry_delay(base_delay, attempt);
                warn!(
                    "Fetch for {} failed ({}), retry {}/{} in {:?}",
                    key, err, attempt, retry, delay
                );
                sleep(delay).await;
            }
            Err(err) => {
                error!("Fetch for {} failed: {}", key, err);
                return Err(err);
            }
        }
    }
}

/// Guard keeping a key mounted; see [`QueryClient::observe`].
///
/// Dropping the last observer of a key cancels its in-flight fetch, whose
/// result is then discarded.
pub struct QueryObserver {
    client: QueryClient,
    key: QueryKey,
}

impl QueryObserver {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        self.client.snapshot(&self.key)
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}
