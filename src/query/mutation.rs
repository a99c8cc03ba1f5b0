use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::QueryClient;
use crate::cache::QueryKey;
use crate::error::{QueryError, Result};

type MutationFn<V, R> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type SuccessFn<V, R> = Box<dyn Fn(&R, &V) + Send + Sync>;
type ErrorFn<V> = Box<dyn Fn(&QueryError, &V) + Send + Sync>;
type KeysFn<V> = Box<dyn Fn(&V) -> Vec<QueryKey> + Send + Sync>;

/// Where a mutation stands
#[derive(Debug)]
pub enum MutationState<R> {
    Idle,
    Pending,
    Succeeded(Arc<R>),
    Failed(QueryError),
}

impl<R> Clone for MutationState<R> {
    fn clone(&self) -> Self {
        match self {
            MutationState::Idle => MutationState::Idle,
            MutationState::Pending => MutationState::Pending,
            MutationState::Succeeded(result) => MutationState::Succeeded(result.clone()),
            MutationState::Failed(err) => MutationState::Failed(err.clone()),
        }
    }
}

/// A write against the backend that invalidates the reads it affects.
///
/// Running it never reads the cache. On success `on_success` runs first,
/// then every key in `invalidates` (plus the keys derived from the
/// variables) is invalidated. On failure the cache is left untouched.
pub struct Mutation<V, R> {
    client: QueryClient,
    mutation_fn: MutationFn<V, R>,
    on_success: Option<SuccessFn<V, R>>,
    on_error: Option<ErrorFn<V>>,
    invalidates: Vec<QueryKey>,
    invalidates_for: Option<KeysFn<V>>,
    state: Mutex<MutationState<R>>,
}

impl<V, R> Mutation<V, R>
where
    V: Clone + Send + 'static,
    R: Send + Sync + 'static,
{
    pub fn new<F, Fut>(client: &QueryClient, mutation_fn: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self {
            client: client.clone(),
            mutation_fn: Arc::new(move |vars| mutation_fn(vars).boxed()),
            on_success: None,
            on_error: None,
            invalidates: Vec::new(),
            invalidates_for: None,
            state: Mutex::new(MutationState::Idle),
        }
    }

    pub fn on_success(mut self, callback: impl Fn(&R, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&QueryError, &V) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Invalidate `key` (and everything under it) after every success
    pub fn invalidates(mut self, key: QueryKey) -> Self {
        self.invalidates.push(key);
        self
    }

    /// Invalidate keys that depend on the variables, e.g. `["email", id]`
    pub fn invalidates_for(
        mut self,
        keys: impl Fn(&V) -> Vec<QueryKey> + Send + Sync + 'static,
    ) -> Self {
        self.invalidates_for = Some(Box::new(keys));
        self
    }

    fn set_state(&self, state: MutationState<R>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn state(&self) -> MutationState<R> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state(), MutationState::Pending)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state(), MutationState::Failed(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state(), MutationState::Succeeded(_))
    }

    /// Back to [`MutationState::Idle`]
    pub fn reset(&self) {
        self.set_state(MutationState::Idle);
    }

    /// Run the write with `variables`
    pub async fn mutate(&self, variables: V) -> Result<Arc<R>> {
        self.set_state(MutationState::Pending);

        match (self.mutation_fn)(variables.clone()).await {
            Ok(result) => {
                let result = Arc::new(result);
                self.set_state(MutationState::Succeeded(result.clone()));
                if let Some(callback) = &self.on_success {
                    callback(&result, &variables);
                }

                let mut keys = self.invalidates.clone();
                if let Some(derive) = &self.invalidates_for {
                    keys.extend(derive(&variables));
                }
                for key in &keys {
                    let affected = self.client.invalidate(key);
                    debug!("Mutation invalidated {} ({} entries)", key, affected);
                }
                Ok(result)
            }
            Err(err) => {
                warn!("Mutation failed: {}", err);
                self.set_state(MutationState::Failed(err.clone()));
                if let Some(callback) = &self.on_error {
                    callback(&err, &variables);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FetchCache;
    use crate::config::QueryDefaults;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn client() -> QueryClient {
        QueryClient::new(Arc::new(FetchCache::new()), QueryDefaults::default())
    }

    fn email_key(id: &str) -> QueryKey {
        QueryKey::root("email").with(id)
    }

    #[tokio::test]
    async fn test_success_invalidates_after_callback() {
        let client = client();
        client.set_query_data(QueryKey::root("emails").with(1), vec![1u32]);
        client.set_query_data(email_key("a"), 1u32);
        client.set_query_data(email_key("b"), 2u32);

        let saw_cached_data = Arc::new(AtomicBool::new(false));
        let mutation = Mutation::new(&client, |(_id, interested): (String, bool)| async move {
            Ok(interested)
        })
        .invalidates(QueryKey::root("emails"))
        .invalidates_for(|(id, _): &(String, bool)| vec![QueryKey::root("email").with(id.as_str())])
        .on_success({
            let cache = client.cache().clone();
            let saw = saw_cached_data.clone();
            move |_, (id, _)| {
                // Invalidation has not run yet
                let still_cached = cache
                    .get::<u32>(&QueryKey::root("email").with(id.as_str()))
                    .is_some();
                saw.store(still_cached, Ordering::SeqCst);
            }
        });

        let result = mutation.mutate(("a".to_string(), true)).await.unwrap();
        assert!(*result);
        assert!(saw_cached_data.load(Ordering::SeqCst));
        assert!(mutation.is_success());

        assert!(client.get_query_data::<Vec<u32>>(&QueryKey::root("emails").with(1)).is_none());
        assert!(client.get_query_data::<u32>(&email_key("a")).is_none());
        assert_eq!(*client.get_query_data::<u32>(&email_key("b")).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let client = client();
        client.set_query_data(QueryKey::root("emails").with(1), 5u32);
        let errors = Arc::new(AtomicUsize::new(0));

        let mutation: Mutation<(), u32> = Mutation::new(&client, |_| async {
            Err(QueryError::Validation("sync already running".to_string()))
        })
        .invalidates(QueryKey::root("emails"))
        .on_error({
            let errors = errors.clone();
            move |err, _| {
                assert!(matches!(err, QueryError::Validation(_)));
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = mutation.mutate(()).await.unwrap_err();
        assert_eq!(err, QueryError::Validation("sync already running".to_string()));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(mutation.is_error());
        assert!(!mutation.is_loading());
        assert_eq!(
            *client.get_query_data::<u32>(&QueryKey::root("emails").with(1)).unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let client = client();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let mutation = Arc::new(Mutation::new(&client, move |_: ()| {
            let rx = rx.clone();
            async move {
                if let Some(rx) = rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok("done".to_string())
            }
        }));
        assert!(matches!(mutation.state(), MutationState::Idle));

        let running = {
            let mutation = mutation.clone();
            tokio::spawn(async move { mutation.mutate(()).await })
        };
        tokio::task::yield_now().await;
        while !mutation.is_loading() {
            tokio::task::yield_now().await;
        }

        tx.send(()).unwrap();
        let result = running.await.unwrap().unwrap();
        assert_eq!(result.as_str(), "done");
        match mutation.state() {
            MutationState::Succeeded(value) => assert_eq!(value.as_str(), "done"),
            other => panic!("unexpected state {:?}", other),
        }

        mutation.reset();
        assert!(matches!(mutation.state(), MutationState::Idle));
    }
}
