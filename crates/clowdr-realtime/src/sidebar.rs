//! Right sidebar state: pinned chats, aggregated unread count and tabs
//!
//! [`PinnedChats`] follows every chat's pin status and keeps a pinned map
//! that is replaced (never mutated) on each change. For every generation of
//! that map it subscribes to the pinned chats' unread counts and tears down
//! the previous generation's subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use clowdr_core::{
    ChatId, ContentGroupId, Observable, RoomId, Subscription, SubscriptionMap, SubscriptionScope,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::chat::{ChatMap, ChatState, GlobalChatState, UnreadCount};
use crate::storage::LocalStorage;

/// Pinned chats keyed by id
pub type PinnedMap = Arc<BTreeMap<ChatId, Arc<ChatState>>>;

/// Tracks pinned chats and their combined unread count
pub struct PinnedChats {
    pinned: Observable<Option<PinnedMap>>,
    unread: Observable<UnreadCount>,
    subscriptions: SubscriptionScope,
    pin_subscriptions: Arc<SubscriptionMap<ChatId>>,
    unread_generation: Arc<Mutex<Vec<Subscription>>>,
}

impl PinnedChats {
    /// Start tracking the chats of `chat_state`
    pub fn attach(chat_state: &GlobalChatState) -> Self {
        let pinned: Observable<Option<PinnedMap>> = Observable::new(None);
        let unread = Observable::new(UnreadCount::ZERO);
        let pin_subscriptions: Arc<SubscriptionMap<ChatId>> = Arc::new(SubscriptionMap::new());
        let unread_generation: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = SubscriptionScope::new();

        subscriptions.add(Self::follow_unread(
            &pinned,
            unread.clone(),
            Arc::clone(&unread_generation),
        ));
        subscriptions.add(Self::follow_pins(
            chat_state,
            pinned.clone(),
            Arc::clone(&pin_subscriptions),
        ));

        Self {
            pinned,
            unread,
            subscriptions,
            pin_subscriptions,
            unread_generation,
        }
    }

    fn follow_unread(
        pinned: &Observable<Option<PinnedMap>>,
        unread: Observable<UnreadCount>,
        generation: Arc<Mutex<Vec<Subscription>>>,
    ) -> Subscription {
        let counts: Arc<Mutex<HashMap<ChatId, UnreadCount>>> = Arc::new(Mutex::new(HashMap::new()));

        pinned.subscribe(move |map| {
            let Some(map) = map else {
                return;
            };

            let previous = std::mem::take(&mut *generation.lock());
            drop(previous);

            let total = {
                let mut counts = counts.lock();
                counts.retain(|id, _| map.contains_key(id));
                UnreadCount::aggregate(counts.values())
            };
            unread.set_if_changed(total);

            let next: Vec<Subscription> = map
                .values()
                .map(|chat| {
                    let chat_id = chat.id();
                    let counts = Arc::clone(&counts);
                    let unread = unread.clone();
                    chat.unread_count().subscribe(move |count| {
                        let total = {
                            let mut counts = counts.lock();
                            counts.insert(chat_id, *count);
                            UnreadCount::aggregate(counts.values())
                        };
                        unread.set_if_changed(total);
                    })
                })
                .collect();
            *generation.lock() = next;
        })
    }

    fn follow_pins(
        chat_state: &GlobalChatState,
        pinned: Observable<Option<PinnedMap>>,
        pin_subscriptions: Arc<SubscriptionMap<ChatId>>,
    ) -> Subscription {
        chat_state.chats().subscribe(move |chats: &ChatMap| {
            if chats.is_empty() {
                pin_subscriptions.retain(|_| false);
                pinned.set(Some(Arc::new(BTreeMap::new())));
                return;
            }

            pin_subscriptions.retain(|id| chats.contains_key(id));
            let stale = pinned
                .get()
                .is_some_and(|map| map.keys().any(|id| !chats.contains_key(id)));
            if stale {
                pinned.update(|old| {
                    old.as_ref().map(|map| {
                        Arc::new(
                            map.iter()
                                .filter(|(id, _)| chats.contains_key(id))
                                .map(|(id, chat)| (*id, Arc::clone(chat)))
                                .collect(),
                        )
                    })
                });
            }

            for chat in chats.values() {
                let weak: Weak<ChatState> = Arc::downgrade(chat);
                let pinned = pinned.clone();
                pin_subscriptions.insert_with(chat.id(), || {
                    chat.is_pinned().subscribe(move |is_pinned| {
                        if let Some(chat) = weak.upgrade() {
                            apply_pin(&pinned, chat, *is_pinned);
                        }
                    })
                });
            }
        })
    }

    /// Current pinned map; `None` until the first chat snapshot arrives
    pub fn pinned(&self) -> Option<PinnedMap> {
        self.pinned.get()
    }

    /// Pinned chats split into display groups
    pub fn groups(&self) -> Option<PinnedGroups> {
        self.pinned
            .get()
            .map(|map| PinnedGroups::from_chats(map.values().cloned()))
    }

    /// Combined unread count of every pinned chat
    pub fn unread(&self) -> UnreadCount {
        self.unread.get()
    }

    /// Observe the combined unread count
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_unread(
        &self,
        callback: impl Fn(&UnreadCount) + Send + Sync + 'static,
    ) -> Subscription {
        self.unread.subscribe(callback)
    }

    /// Observe pinned map generations
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_pinned(
        &self,
        callback: impl Fn(&Option<PinnedMap>) + Send + Sync + 'static,
    ) -> Subscription {
        self.pinned.subscribe(callback)
    }

    /// Number of chats whose pin status is being followed
    pub fn followed_chats(&self) -> usize {
        self.pin_subscriptions.len()
    }

    /// Stop tracking
    pub fn close(&self) {
        self.subscriptions.close();
        self.pin_subscriptions.close();
        let generation = std::mem::take(&mut *self.unread_generation.lock());
        drop(generation);
    }
}

fn apply_pin(pinned: &Observable<Option<PinnedMap>>, chat: Arc<ChatState>, is_pinned: bool) {
    let id = chat.id();
    let current = pinned.get();
    let present = current.as_ref().is_some_and(|map| map.contains_key(&id));

    if is_pinned == present && current.is_some() {
        return;
    }

    debug!(chat_id = %id, is_pinned, "Pinned chats changed");
    pinned.update(|old| {
        let mut next = old.as_deref().cloned().unwrap_or_default();
        if is_pinned {
            next.insert(id, chat);
        } else {
            next.remove(&id);
        }
        Some(Arc::new(next))
    });
}

/// Pinned chats grouped the way the sidebar lists them
#[derive(Debug, Clone, Default)]
pub struct PinnedGroups {
    /// Chats pinned for everyone
    pub mandatory: Vec<Arc<ChatState>>,
    /// Direct messages
    pub direct_messages: Vec<Arc<ChatState>>,
    /// Everything else
    pub others: Vec<Arc<ChatState>>,
}

impl PinnedGroups {
    /// Split and sort chats; each group uses [`ChatState::compare`]
    pub fn from_chats(chats: impl IntoIterator<Item = Arc<ChatState>>) -> Self {
        let mut groups = PinnedGroups::default();
        for chat in chats {
            if chat.enable_mandatory_pin() {
                groups.mandatory.push(chat);
            } else if chat.is_dm() {
                groups.direct_messages.push(chat);
            } else {
                groups.others.push(chat);
            }
        }
        for group in [
            &mut groups.mandatory,
            &mut groups.direct_messages,
            &mut groups.others,
        ] {
            group.sort_by(|a, b| ChatState::compare(a, b));
        }
        groups
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty() && self.direct_messages.is_empty() && self.others.is_empty()
    }
}

/// Local storage key for the selected sidebar tab
pub const CURRENT_TAB_KEY: &str = "RightSideBar_CurrentTab";

/// Sidebar tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidebarTab {
    /// Chat of the room or item being viewed
    PageChat,
    /// Pinned chats and people search
    Chats,
    /// Who else is on this page
    Presence,
}

impl SidebarTab {
    /// Persisted code
    pub fn code(self) -> u8 {
        match self {
            SidebarTab::PageChat => 1,
            SidebarTab::Chats => 2,
            SidebarTab::Presence => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SidebarTab::PageChat),
            2 => Some(SidebarTab::Chats),
            3 => Some(SidebarTab::Presence),
            _ => None,
        }
    }

    /// Position in the tab strip. The page chat tab only exists on room and
    /// item pages, shifting the others right.
    pub fn index(self, has_page_chat: bool) -> usize {
        let offset = usize::from(has_page_chat);
        match self {
            SidebarTab::PageChat => 0,
            SidebarTab::Chats => offset,
            SidebarTab::Presence => 1 + offset,
        }
    }

    /// Tab at a strip position
    pub fn from_index(index: usize, has_page_chat: bool) -> Option<Self> {
        match (has_page_chat, index) {
            (true, 0) => Some(SidebarTab::PageChat),
            (true, 1) | (false, 0) => Some(SidebarTab::Chats),
            (true, 2) | (false, 1) => Some(SidebarTab::Presence),
            _ => None,
        }
    }
}

/// Page the sidebar is shown next to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidebarPage {
    #[default]
    Other,
    Room(RoomId),
    Item(ContentGroupId),
}

impl SidebarPage {
    pub fn has_page_chat(&self) -> bool {
        !matches!(self, SidebarPage::Other)
    }

    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            SidebarPage::Room(id) => Some(*id),
            _ => None,
        }
    }
}

/// Tab selection and open-chat state of the right sidebar
pub struct RightSidebar {
    storage: Arc<dyn LocalStorage>,
    page: RwLock<SidebarPage>,
    current_tab: Observable<SidebarTab>,
    page_chat_id: Observable<Option<ChatId>>,
    current_chat_id: Observable<Option<ChatId>>,
}

impl RightSidebar {
    /// Create the sidebar, restoring the last selected tab
    pub fn new(storage: Arc<dyn LocalStorage>) -> Arc<Self> {
        let restored = match storage.get_item(CURRENT_TAB_KEY) {
            Ok(value) => value
                .and_then(|v| v.trim().parse::<u8>().ok())
                .and_then(SidebarTab::from_code),
            Err(e) => {
                warn!(error = %e, "Failed to read sidebar tab");
                None
            }
        };
        Arc::new(Self {
            storage,
            page: RwLock::new(SidebarPage::Other),
            current_tab: Observable::new(restored.unwrap_or(SidebarTab::Chats)),
            page_chat_id: Observable::new(None),
            current_chat_id: Observable::new(None),
        })
    }

    /// Register as the target of [`GlobalChatState::open_chat_in_sidebar`]
    pub fn install(self: &Arc<Self>, chat_state: &GlobalChatState) {
        let weak = Arc::downgrade(self);
        chat_state.set_open_chat_in_sidebar(Arc::new(move |chat_id| {
            if let Some(sidebar) = weak.upgrade() {
                sidebar.open_chat(chat_id);
            }
        }));
    }

    pub fn current_tab(&self) -> SidebarTab {
        self.current_tab.get()
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_tab(&self, callback: impl Fn(&SidebarTab) + Send + Sync + 'static) -> Subscription {
        self.current_tab.subscribe(callback)
    }

    /// Select a tab and remember it
    pub fn set_tab(&self, tab: SidebarTab) {
        if self.current_tab.set_if_changed(tab) {
            if let Err(e) = self.storage.set_item(CURRENT_TAB_KEY, &tab.code().to_string()) {
                warn!(error = %e, "Failed to persist sidebar tab");
            }
        }
    }

    /// Strip position of the selected tab on the current page
    pub fn tab_index(&self) -> usize {
        self.current_tab().index(self.page.read().has_page_chat())
    }

    /// Select by strip position; returns false for positions with no tab
    pub fn select_index(&self, index: usize) -> bool {
        let has_page_chat = self.page.read().has_page_chat();
        match SidebarTab::from_index(index, has_page_chat) {
            Some(tab) => {
                self.set_tab(tab);
                true
            }
            None => false,
        }
    }

    /// Navigate; room and item pages jump to their chat
    pub fn set_page(&self, page: SidebarPage) {
        *self.page.write() = page;
        if page.has_page_chat() {
            self.set_tab(SidebarTab::PageChat);
        } else {
            self.page_chat_id.set_if_changed(None);
        }
    }

    pub fn page(&self) -> SidebarPage {
        *self.page.read()
    }

    /// Record the chat id of the current room or item once it is loaded
    pub fn set_page_chat_id(&self, chat_id: ChatId) {
        self.page_chat_id.set_if_changed(Some(chat_id));
    }

    pub fn page_chat_id(&self) -> Option<ChatId> {
        self.page_chat_id.get()
    }

    /// Open a chat from elsewhere in the app
    pub fn open_chat(&self, chat_id: ChatId) {
        self.set_tab(SidebarTab::Chats);
        self.select_chat(chat_id);
    }

    /// Select a chat in the chats list; the page's own chat switches to its tab
    pub fn select_chat(&self, chat_id: ChatId) {
        self.current_chat_id.set_if_changed(Some(chat_id));
        if self.page_chat_id() == Some(chat_id) {
            self.set_tab(SidebarTab::PageChat);
        }
    }

    /// Back to the chats list
    pub fn close_chat(&self) {
        self.current_chat_id.set_if_changed(None);
    }

    pub fn current_chat_id(&self) -> Option<ChatId> {
        self.current_chat_id.get()
    }

    /// Chat shown full-size in the chats tab, if any. The page's own chat is
    /// shown in the page tab instead.
    pub fn displayed_chat_id(&self) -> Option<ChatId> {
        self.current_chat_id().filter(|id| Some(*id) != self.page_chat_id())
    }
}
