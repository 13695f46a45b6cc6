//! Debounced registrant search for starting direct messages
//!
//! Each keystroke replaces the query and restarts a [`SEARCH_DEBOUNCE`]
//! timer; only when the timer fires is the directory queried, so newer
//! input always cancels older searches. Changing the query hides the old
//! results right away. Queries shorter than [`MIN_SEARCH_LENGTH`] clear the
//! results instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clowdr_core::{ConferenceId, Observable, RegistrantId, Subscription, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RealtimeResult;

/// Delay between the last keystroke and the query
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(750);

/// Shortest query that is sent to the directory
pub const MIN_SEARCH_LENGTH: usize = 3;

/// Results shown before the user asks for more
pub const INITIAL_RESULT_COUNT: usize = 30;

/// A registrant as returned by the directory search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrantSummary {
    pub id: RegistrantId,
    pub user_id: Option<UserId>,
    pub display_name: String,
    pub has_profile: bool,
}

/// Registrant lookup backed by the data layer
#[async_trait]
pub trait RegistrantDirectory: Send + Sync + 'static {
    /// Registrants of a conference matching an SQL `ILIKE` pattern
    async fn search_registrants(
        &self,
        conference_id: ConferenceId,
        pattern: &str,
    ) -> RealtimeResult<Vec<RegistrantSummary>>;
}

/// Wrap a search term as a substring pattern
pub fn search_pattern(term: &str) -> String {
    format!("%{}%", term)
}

#[derive(Debug, Default)]
struct SearchState {
    query: String,
    all: Option<Vec<RegistrantSummary>>,
    loaded_count: usize,
}

impl SearchState {
    fn visible(&self, exclude: Option<RegistrantId>) -> Option<Vec<RegistrantSummary>> {
        if self.query.is_empty() {
            return None;
        }
        self.all.as_ref().map(|all| {
            all.iter()
                .take(self.loaded_count)
                .filter(|r| Some(r.id) != exclude)
                .cloned()
                .collect()
        })
    }
}

/// Search box state for one conference
pub struct RegistrantSearch {
    directory: Arc<dyn RegistrantDirectory>,
    conference_id: ConferenceId,
    current_registrant: Option<RegistrantId>,
    state: Arc<Mutex<SearchState>>,
    results: Observable<Option<Vec<RegistrantSummary>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl RegistrantSearch {
    /// `current_registrant` is left out of results; nobody DMs themselves
    pub fn new(
        directory: Arc<dyn RegistrantDirectory>,
        conference_id: ConferenceId,
        current_registrant: Option<RegistrantId>,
    ) -> Self {
        Self {
            directory,
            conference_id,
            current_registrant,
            state: Arc::new(Mutex::new(SearchState {
                loaded_count: INITIAL_RESULT_COUNT,
                ..SearchState::default()
            })),
            results: Observable::new(None),
            pending: Mutex::new(None),
            debounce: SEARCH_DEBOUNCE,
        }
    }

    /// Replace the query text. Must be called within a Tokio runtime.
    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        {
            let mut state = self.state.lock();
            if state.query != query {
                state.all = None;
            }
            state.query = query.clone();
        }
        self.publish();

        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }

        let directory = Arc::clone(&self.directory);
        let state = Arc::clone(&self.state);
        let results = self.results.clone();
        let conference_id = self.conference_id;
        let exclude = self.current_registrant;
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            if query.chars().count() < MIN_SEARCH_LENGTH {
                state.lock().all = None;
            } else {
                let pattern = search_pattern(&query);
                debug!(conference_id = %conference_id, pattern = %pattern, "Searching registrants");
                match directory.search_registrants(conference_id, &pattern).await {
                    Ok(found) => {
                        let found: Vec<RegistrantSummary> = found
                            .into_iter()
                            .filter(|r| r.has_profile && r.user_id.is_some())
                            .collect();
                        let mut state = state.lock();
                        state.all = Some(found);
                        state.loaded_count = INITIAL_RESULT_COUNT;
                    }
                    Err(e) => {
                        warn!(error = %e, "Registrant search failed");
                    }
                }
            }

            let visible = state.lock().visible(exclude);
            results.set(visible);
        });
        *self.pending.lock() = Some(task);
    }

    /// Show `additional` more results
    pub fn load_more(&self, additional: usize) {
        self.state.lock().loaded_count += additional;
        self.publish();
    }

    /// Results to display; `None` when there is nothing to show
    pub fn results(&self) -> Option<Vec<RegistrantSummary>> {
        self.results.get()
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(
        &self,
        callback: impl Fn(&Option<Vec<RegistrantSummary>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.results.subscribe(callback)
    }

    fn publish(&self) {
        let visible = self.state.lock().visible(self.current_registrant);
        self.results.set(visible);
    }
}

impl Drop for RegistrantSearch {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.abort();
        }
    }
}
