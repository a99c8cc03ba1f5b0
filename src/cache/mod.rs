//! Keyed store for the latest successful result of each read.
//!
//! The cache is an explicit object: the query layer receives it through its
//! constructor instead of reaching for global state, so every test can work
//! against its own instance. Values of any type can live side by side; a
//! lookup with the wrong type behaves like a miss.

pub mod key;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use key::QueryKey;

/// One cached read result
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub data: Arc<T>,
    pub stored_at: Instant,
    invalidated: bool,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            stored_at: self.stored_at,
            invalidated: self.invalidated,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Time elapsed since the entry was stored
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    /// `now - stored_at < max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() < max_age
    }

    /// Set when a mutation invalidated the entry while a consumer still
    /// observed it. Such an entry is served but always refetched.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

struct StoredEntry {
    data: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
    invalidated: bool,
}

/// Process-wide cache of read results, addressed by [`QueryKey`]
#[derive(Default)]
pub struct FetchCache {
    entries: Mutex<HashMap<QueryKey, StoredEntry>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, StoredEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the entry for `key`
    pub fn get<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let entries = self.lock();
        let stored = entries.get(key)?;
        match stored.data.clone().downcast::<T>() {
            Ok(data) => Some(CacheEntry {
                data,
                stored_at: stored.stored_at,
                invalidated: stored.invalidated,
            }),
            Err(_) => {
                warn!("Cache entry {} holds a different type, treating as miss", key);
                None
            }
        }
    }

    /// Store `data` under `key`, replacing whatever was there
    pub fn set<T: Send + Sync + 'static>(&self, key: QueryKey, data: T) -> CacheEntry<T> {
        self.set_shared(key, Arc::new(data))
    }

    /// Same as [`set`](Self::set) for data that is already shared
    pub fn set_shared<T: Send + Sync + 'static>(
        &self,
        key: QueryKey,
        data: Arc<T>,
    ) -> CacheEntry<T> {
        let stored_at = Instant::now();
        debug!("Cache set {}", key);
        self.lock().insert(
            key,
            StoredEntry {
                data: data.clone(),
                stored_at,
                invalidated: false,
            },
        );
        CacheEntry {
            data,
            stored_at,
            invalidated: false,
        }
    }

    pub(crate) fn set_any(&self, key: QueryKey, data: Arc<dyn Any + Send + Sync>) {
        debug!("Cache set {}", key);
        self.lock().insert(
            key,
            StoredEntry {
                data,
                stored_at: Instant::now(),
                invalidated: false,
            },
        );
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove one entry. Returns whether something was removed.
    pub fn delete(&self, key: &QueryKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn remove_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut entries = self.lock();
        let doomed: Vec<QueryKey> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        doomed
    }

    /// Flag an entry so the next read refetches it while still serving it
    pub fn mark_invalidated(&self, key: &QueryKey) -> bool {
        match self.lock().get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Keys currently stored under `prefix`
    pub fn keys_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Drop entries older than `max_age`, returning how many were dropped
    pub fn prune(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < max_age);
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!("Pruned {} expired cache entries", pruned);
        }
        pruned
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
