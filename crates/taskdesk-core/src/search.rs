//! Debounced user search.
//!
//! Each query change restarts a quiet-interval timer; only the query current
//! when the timer fires is sent. A response that arrives after a newer query
//! was typed is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use taskdesk_types::UserSummary;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::ApiResult;
use crate::auth::AuthService;
use crate::registry::lock;

/// Remote user lookup.
pub trait UserDirectory: Send + Sync + 'static {
    fn search_users(&self, query: &str) -> impl Future<Output = ApiResult<Vec<UserSummary>>> + Send;
}

impl UserDirectory for AuthService {
    fn search_users(&self, query: &str) -> impl Future<Output = ApiResult<Vec<UserSummary>>> + Send {
        AuthService::search_users(self, query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    /// Waiting out the quiet interval
    Pending { query: String },
    Loading { query: String },
    Ready { query: String, users: Vec<UserSummary> },
    Failed { query: String, message: String },
}

impl SearchState {
    pub fn users(&self) -> &[UserSummary] {
        match self {
            SearchState::Ready { users, .. } => users,
            _ => &[],
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SearchState::Idle | SearchState::Ready { .. } | SearchState::Failed { .. }
        )
    }
}

#[derive(Default)]
struct DebounceState {
    generation: u64,
    pending: Option<CancellationToken>,
    latest_query: String,
}

struct SearchInner<D> {
    directory: D,
    delay: Duration,
    state: Mutex<DebounceState>,
    results: watch::Sender<SearchState>,
}

impl<D> SearchInner<D> {
    /// Invalidates everything scheduled or in flight.
    fn supersede(&self, state: &mut DebounceState) -> u64 {
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.cancel();
        }
        state.generation
    }
}

impl<D> Drop for SearchInner<D> {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if let Some(pending) = &state.pending {
            pending.cancel();
        }
    }
}

/// Collapses rapid query changes into one delayed search.
///
/// Must be used inside a tokio runtime.
pub struct DebouncedSearch<D = AuthService> {
    inner: Arc<SearchInner<D>>,
}

impl<D: UserDirectory> DebouncedSearch<D> {
    pub fn new(directory: D, delay: Duration) -> Self {
        let (results, _) = watch::channel(SearchState::Idle);
        Self {
            inner: Arc::new(SearchInner {
                directory,
                delay,
                state: Mutex::new(DebounceState::default()),
                results,
            }),
        }
    }

    pub fn state(&self) -> SearchState {
        self.inner.results.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.results.subscribe()
    }

    /// Schedules a search for `query`, replacing any pending one.
    ///
    /// A blank query clears the results at once.
    pub fn on_query_change(&self, query: &str) {
        let (generation, token) = {
            let mut state = lock(&self.inner.state);
            let generation = self.inner.supersede(&mut state);
            state.latest_query = query.to_string();

            if query.trim().is_empty() {
                self.inner.results.send_replace(SearchState::Idle);
                return;
            }

            let token = CancellationToken::new();
            state.pending = Some(token.clone());
            self.inner.results.send_replace(SearchState::Pending {
                query: query.trim().to_string(),
            });
            (generation, token)
        };

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            fire(weak, generation).await;
        });
    }

    /// Cancels the pending search and drops any response still in flight.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        self.inner.supersede(&mut state);
    }
}

async fn fire<D: UserDirectory>(weak: Weak<SearchInner<D>>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    let query = {
        let mut state = lock(&inner.state);
        if state.generation != generation {
            return;
        }
        state.pending = None;
        state.latest_query.trim().to_string()
    };

    tracing::debug!(query = %query, "user search");
    inner.results.send_replace(SearchState::Loading {
        query: query.clone(),
    });
    let result = inner.directory.search_users(&query).await;

    if lock(&inner.state).generation != generation {
        tracing::debug!(query = %query, "discarding stale search response");
        return;
    }
    let next = match result {
        Ok(users) => SearchState::Ready { query, users },
        Err(e) => SearchState::Failed {
            query,
            message: e.message,
        },
    };
    inner.results.send_replace(next);
}

impl<D> std::fmt::Debug for DebouncedSearch<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedSearch")
            .field("delay", &self.inner.delay)
            .field("state", &*self.inner.results.borrow())
            .finish_non_exhaustive()
    }
}
