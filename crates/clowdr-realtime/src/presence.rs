//! Presence: who is looking at which page, and who is in which room
//!
//! Presence sets arrive from the realtime service and replace the previous
//! set for that page wholesale. Nothing is persisted; after a reconnect the
//! service republishes and [`PresenceState::clear`] drops what came before.
//! Pages that are empty and unobserved are forgotten.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use clowdr_core::{Observable, ParticipantId, RegistrantId, RoomId, Subscription, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Users present on one page
pub type PresenceSet = Arc<BTreeSet<UserId>>;

/// Key identifying a page within an optional conference
pub fn page_key(path: &str, conference_slug: Option<&str>) -> String {
    match conference_slug {
        Some(slug) => format!("{}:{}", slug, path),
        None => path.to_string(),
    }
}

/// Per-page presence sets
#[derive(Default)]
pub struct PresenceState {
    pages: DashMap<String, Observable<PresenceSet>>,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self, key: String) -> Observable<PresenceSet> {
        self.pages
            .entry(key)
            .or_insert_with(|| Observable::new(Arc::new(BTreeSet::new())))
            .clone()
    }

    /// Observe the users present on a page (called immediately with the
    /// current set, then on every replacement)
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn observe_page(
        &self,
        path: &str,
        conference_slug: Option<&str>,
        callback: impl Fn(&BTreeSet<UserId>) + Send + Sync + 'static,
    ) -> Subscription {
        let key = page_key(path, conference_slug);
        let callback = Arc::new(callback);
        loop {
            let page = self.page(key.clone());
            let callback = Arc::clone(&callback);
            let subscription = page.subscribe(move |users| callback(users.as_ref()));
            // The entry may have been pruned between lookup and subscribe
            if self.pages.get(&key).is_some_and(|current| current.ptr_eq(&page)) {
                return subscription;
            }
        }
    }

    /// Replace the presence set of a page
    pub fn update_page(
        &self,
        path: &str,
        conference_slug: Option<&str>,
        users: impl IntoIterator<Item = UserId>,
    ) {
        let key = page_key(path, conference_slug);
        let users: BTreeSet<UserId> = users.into_iter().collect();
        trace!(page = %key, count = users.len(), "Presence updated");
        if users.is_empty() {
            let Some(page) = self.pages.get(&key).map(|page| page.value().clone()) else {
                return;
            };
            page.set_if_changed(Arc::new(users));
            self.pages.remove_if(&key, |_, page| is_idle(page));
        } else {
            self.page(key).set_if_changed(Arc::new(users));
        }
    }

    /// Number of users on a page
    pub fn page_count(&self, path: &str, conference_slug: Option<&str>) -> usize {
        self.pages
            .get(&page_key(path, conference_slug))
            .map(|page| page.get().len())
            .unwrap_or(0)
    }

    /// Empty every page, notifying observers
    pub fn clear(&self) {
        let pages: Vec<Observable<PresenceSet>> =
            self.pages.iter().map(|page| page.value().clone()).collect();
        for page in pages {
            page.set_if_changed(Arc::new(BTreeSet::new()));
        }
        self.pages.retain(|_, page| !is_idle(page));
    }

    /// Pages currently held, observed or non-empty
    pub fn tracked_pages(&self) -> usize {
        self.pages.len()
    }
}

fn is_idle(page: &Observable<PresenceSet>) -> bool {
    page.subscriber_count() == 0 && page.get().is_empty()
}

/// A live connection to a room's video call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParticipant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub registrant_id: RegistrantId,
}

/// What a reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantDiff {
    pub added: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
}

impl ParticipantDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Participants of one room in stable display order
#[derive(Debug, Clone)]
pub struct ParticipantList {
    room_id: RoomId,
    entries: Vec<RoomParticipant>,
}

impl ParticipantList {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            entries: Vec::new(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn entries(&self) -> &[RoomParticipant] {
        &self.entries
    }

    /// Reconcile against the full participants feed
    ///
    /// Entries for other rooms are ignored. Existing entries still in the
    /// feed keep their position, departed ones are dropped and new arrivals
    /// are appended in feed order.
    pub fn reconcile(&mut self, feed: &[RoomParticipant]) -> ParticipantDiff {
        let current: Vec<&RoomParticipant> =
            feed.iter().filter(|p| p.room_id == self.room_id).collect();
        let current_ids: HashSet<ParticipantId> = current.iter().map(|p| p.id).collect();
        let known_ids: HashSet<ParticipantId> = self.entries.iter().map(|p| p.id).collect();

        let mut diff = ParticipantDiff::default();
        self.entries.retain(|entry| {
            let keep = current_ids.contains(&entry.id);
            if !keep {
                diff.removed.push(entry.id);
            }
            keep
        });

        let mut appended = HashSet::new();
        for participant in current {
            if !known_ids.contains(&participant.id) && appended.insert(participant.id) {
                diff.added.push(participant.id);
                self.entries.push(participant.clone());
            }
        }
        diff
    }
}
