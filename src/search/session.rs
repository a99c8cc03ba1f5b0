use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use super::{
    filter_emails, parse_search, sort_emails, ParsedSearch, SearchFilters, SearchState,
    SortConfig, SortField,
};
use crate::api::models::Email;
use crate::config::SearchConfig;

/// Where a session stands: `Idle -> Debouncing -> Filtering -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    /// A query change is waiting for the debounce delay
    Debouncing,
    Filtering,
}

struct SessionState {
    emails: Arc<Vec<Email>>,
    search: SearchState,
    /// Query actually used for filtering, lags `search.query`
    debounced_query: String,
    phase: SearchPhase,
    recomputes: u64,
}

struct Shared {
    config: SearchConfig,
    state: Mutex<SessionState>,
    results: watch::Sender<Arc<Vec<Email>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Filter and sort into a new visible list; caller holds the lock
    fn recompute(&self, state: &mut SessionState) {
        state.phase = SearchPhase::Filtering;
        let mut visible = filter_emails(
            &state.emails,
            &state.debounced_query,
            &state.search.filters,
            self.config.min_query_length,
        );
        sort_emails(&mut visible, &state.search.sort_config);
        state.recomputes += 1;
        debug!(
            "Search recomputed: {} of {} emails visible",
            visible.len(),
            state.emails.len()
        );
        self.results.send_replace(Arc::new(visible));
        // A query change may still be waiting for its timer
        state.phase = if state.search.is_searching {
            SearchPhase::Debouncing
        } else {
            SearchPhase::Idle
        };
    }

    /// Debounce timer fired: adopt the raw query and recompute
    fn settle(&self) {
        let mut state = self.lock();
        state.debounced_query = state.search.query.clone();
        state.search.is_searching = false;
        self.recompute(&mut state);
    }
}

/// Debounced search over one email collection.
///
/// Query changes are applied after `config.debounce` without further
/// changes; filter, sort and collection changes apply immediately. Methods
/// that schedule the debounce timer must be called inside a tokio runtime.
pub struct SearchSession {
    shared: Arc<Shared>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SearchSession {
    pub fn new(config: SearchConfig, emails: Vec<Email>) -> Self {
        let (results, _) = watch::channel(Arc::new(Vec::new()));
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(SessionState {
                emails: Arc::new(emails),
                search: SearchState::default(),
                debounced_query: String::new(),
                phase: SearchPhase::Idle,
                recomputes: 0,
            }),
            results,
        });
        {
            let mut state = shared.lock();
            shared.recompute(&mut state);
        }
        Self {
            shared,
            pending: Mutex::new(None),
        }
    }

    fn cancel_pending(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Change the raw query; results follow once typing pauses
    pub fn set_query(&self, query: &str) {
        {
            let mut state = self.shared.lock();
            state.search.query = query.to_string();
            state.search.is_searching = true;
            state.phase = SearchPhase::Debouncing;
        }

        let shared = self.shared.clone();
        let delay = self.shared.config.debounce;
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            shared.settle();
        });

        // Every keystroke restarts the timer
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Apply a pending query change right away
    pub fn flush(&self) {
        if self.cancel_pending() {
            self.shared.settle();
        }
    }

    /// Edit the filters in place and recompute
    pub fn update_filters(&self, update: impl FnOnce(&mut SearchFilters)) {
        let mut state = self.shared.lock();
        update(&mut state.search.filters);
        self.shared.recompute(&mut state);
    }

    /// Replace all filters and recompute
    pub fn set_filters(&self, filters: SearchFilters) {
        self.update_filters(|current| *current = filters);
    }

    /// Sort by `field`; asking for the active field again flips the direction
    pub fn update_sort(&self, field: SortField) {
        let mut state = self.shared.lock();
        state.search.sort_config = state.search.sort_config.toggle(field);
        self.shared.recompute(&mut state);
    }

    pub fn set_sort(&self, sort_config: SortConfig) {
        let mut state = self.shared.lock();
        state.search.sort_config = sort_config;
        self.shared.recompute(&mut state);
    }

    /// Swap in a newly loaded collection
    pub fn set_emails(&self, emails: Vec<Email>) {
        let mut state = self.shared.lock();
        state.emails = Arc::new(emails);
        self.shared.recompute(&mut state);
    }

    /// Back to the initial query, filters and sort order
    pub fn reset_search(&self) {
        self.cancel_pending();
        let mut state = self.shared.lock();
        state.search = SearchState::default();
        state.debounced_query.clear();
        self.shared.recompute(&mut state);
    }

    /// Currently visible emails
    pub fn results(&self) -> Arc<Vec<Email>> {
        self.shared.results.borrow().clone()
    }

    /// Watch the visible emails change
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Email>>> {
        self.shared.results.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.shared.lock().search.clone()
    }

    pub fn debounced_query(&self) -> String {
        self.shared.lock().debounced_query.clone()
    }

    pub fn phase(&self) -> SearchPhase {
        self.shared.lock().phase
    }

    /// Number of filter and sort passes so far, including the initial one
    pub fn recompute_count(&self) -> u64 {
        self.shared.lock().recomputes
    }

    /// Tokenized view of the raw query against the current filters
    pub fn parsed(&self) -> ParsedSearch {
        let state = self.shared.lock();
        parse_search(&state.search.query, &state.search.filters)
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SortDirection, SortField};
    use std::time::Duration;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn inbox() -> Vec<Email> {
        vec![
            Email::new("1", "Partnership deal", "ceo@acme.io", "", "2024-03-01T10:00:00"),
            Email::new("2", "Invoice", "billing@vendor.com", "", "2024-03-05T10:00:00"),
            Email::new("3", "Abc roadmap", "pm@acme.io", "", "2024-03-03T10:00:00"),
        ]
    }

    fn ids(emails: &[Email]) -> Vec<&str> {
        emails.iter().map(|e| e.id.as_str()).collect()
    }

    fn session() -> SearchSession {
        SearchSession::new(
            SearchConfig {
                debounce: DEBOUNCE,
                min_query_length: 2,
            },
            inbox(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_results_sorted_newest_first() {
        let session = session();
        assert_eq!(ids(&session.results()), vec!["2", "3", "1"]);
        assert_eq!(session.phase(), SearchPhase::Idle);
        assert_eq!(session.recompute_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_typing_recomputes_once() {
        let session = session();
        let before = session.recompute_count();

        session.set_query("a");
        sleep(Duration::from_millis(100)).await;
        session.set_query("ab");
        sleep(Duration::from_millis(100)).await;
        session.set_query("abc");

        assert_eq!(session.phase(), SearchPhase::Debouncing);
        assert!(session.state().is_searching);
        assert_eq!(session.recompute_count(), before);

        sleep(DEBOUNCE + Duration::from_millis(1)).await;

        assert_eq!(session.recompute_count(), before + 1);
        assert_eq!(session.debounced_query(), "abc");
        assert_eq!(ids(&session.results()), vec!["3"]);
        assert_eq!(session.phase(), SearchPhase::Idle);
        assert!(!session.state().is_searching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_lag_raw_query() {
        let session = session();
        session.set_query("partner");
        assert_eq!(session.state().query, "partner");
        assert_eq!(session.debounced_query(), "");
        assert_eq!(session.results().len(), 3);

        sleep(DEBOUNCE + Duration::from_millis(1)).await;
        assert_eq!(ids(&session.results()), vec!["1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters_apply_without_debounce() {
        let session = session();
        session.update_filters(|filters| filters.sender = Some("pm@acme.io".to_string()));
        assert_eq!(ids(&session.results()), vec!["3"]);

        session.set_filters(SearchFilters::default());
        assert_eq!(session.results().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_keeps_pending_debounce() {
        let session = session();
        session.set_query("invoice");
        session.update_filters(|filters| filters.sender = Some("billing@vendor.com".to_string()));

        assert_eq!(session.phase(), SearchPhase::Debouncing);
        assert!(session.state().is_searching);
        assert_eq!(ids(&session.results()), vec!["2"]);

        session.update_sort(SortField::Subject);
        session.set_emails(inbox());
        assert_eq!(session.phase(), SearchPhase::Debouncing);

        sleep(DEBOUNCE + Duration::from_millis(1)).await;
        assert_eq!(session.phase(), SearchPhase::Idle);
        assert_eq!(session.debounced_query(), "invoice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_sort_toggles_direction() {
        let session = session();
        session.update_sort(SortField::Subject);
        assert_eq!(session.state().sort_config.direction, SortDirection::Asc);
        assert_eq!(ids(&session.results()), vec!["3", "2", "1"]);

        session.update_sort(SortField::Subject);
        let sort = session.state().sort_config;
        assert_eq!(sort.field, SortField::Subject);
        assert_eq!(sort.direction, SortDirection::Desc);
        assert_eq!(ids(&session.results()), vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_query() {
        let session = session();
        session.update_sort(SortField::Sender);
        session.set_query("invoice");
        session.reset_search();

        sleep(DEBOUNCE * 2).await;
        assert_eq!(session.state(), SearchState::default());
        assert_eq!(session.debounced_query(), "");
        assert_eq!(ids(&session.results()), vec!["2", "3", "1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_applies_immediately() {
        let session = session();
        session.set_query("invoice");
        session.flush();
        assert_eq!(ids(&session.results()), vec!["2"]);
        assert_eq!(session.phase(), SearchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_collection_is_filtered() {
        let session = session();
        session.set_query("deal");
        session.flush();
        assert_eq!(ids(&session.results()), vec!["1"]);

        let mut emails = inbox();
        emails.push(Email::new("4", "Another deal", "x@y.io", "", "2024-03-09T10:00:00"));
        session.set_emails(emails);
        assert_eq!(ids(&session.results()), vec!["4", "1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_updates() {
        let session = session();
        let mut rx = session.subscribe();
        session.set_query("invoice");

        rx.changed().await.unwrap();
        assert_eq!(ids(&rx.borrow()), vec!["2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsed_reflects_raw_query() {
        let session = session();
        session.set_query("sender:ceo@acme.io deal");
        let parsed = session.parsed();
        assert_eq!(parsed.filters.sender.as_deref(), Some("ceo@acme.io"));
        assert_eq!(parsed.text(), "deal");
        // Advisory only: the session filters still hold no sender
        assert!(session.state().filters.sender.is_none());
    }
}
