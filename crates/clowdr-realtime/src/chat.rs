//! Chat thread view-models and the registry that owns them
//!
//! The chat backend layer creates one [`ChatState`] per thread through
//! [`GlobalChatState::upsert_chat`]; views only observe. Each chat exposes
//! its pin status and unread count as [`Observable`] streams.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use clowdr_core::{ChatId, Observable, RoomId, Subscription, SubscriptionScope};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{RealtimeError, RealtimeResult};

/// Unread count at or above which the count is shown as `10+`
pub const UNREAD_OVERFLOW_AT: u32 = 10;

/// Unread message count as displayed next to a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadCount {
    /// An exact count; zero renders as an empty string
    Count(u32),
    /// Too many to count exactly; renders as `10+`
    Overflow,
}

impl Default for UnreadCount {
    fn default() -> Self {
        UnreadCount::ZERO
    }
}

impl UnreadCount {
    /// No unread messages
    pub const ZERO: UnreadCount = UnreadCount::Count(0);

    /// Count from a raw number, switching to the overflow sentinel at the cap
    pub fn from_count(count: u32) -> Self {
        if count >= UNREAD_OVERFLOW_AT {
            UnreadCount::Overflow
        } else {
            UnreadCount::Count(count)
        }
    }

    /// Parse the display form. Anything containing `+` is an overflow;
    /// empty or unparsable text counts as zero.
    pub fn parse(text: &str) -> Self {
        if text.contains('+') {
            return UnreadCount::Overflow;
        }
        UnreadCount::Count(text.trim().parse().unwrap_or(0))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, UnreadCount::Count(0))
    }

    /// Sum counts; a single overflow makes the whole total an overflow
    pub fn aggregate<'a>(counts: impl IntoIterator<Item = &'a UnreadCount>) -> Self {
        let mut total: u32 = 0;
        for count in counts {
            match count {
                UnreadCount::Overflow => return UnreadCount::Overflow,
                UnreadCount::Count(n) => total = total.saturating_add(*n),
            }
        }
        UnreadCount::Count(total)
    }
}

impl fmt::Display for UnreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreadCount::Count(0) => Ok(()),
            UnreadCount::Count(n) => write!(f, "{}", n),
            UnreadCount::Overflow => write!(f, "{}+", UNREAD_OVERFLOW_AT),
        }
    }
}

/// Static description of a chat thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub name: String,
    pub is_dm: bool,
    pub is_private: bool,
    /// Pinned for everyone; users cannot unpin it
    pub enable_mandatory_pin: bool,
    /// Video room the chat belongs to, if any
    pub room_id: Option<RoomId>,
}

impl ChatInfo {
    pub fn new(id: ChatId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_dm: false,
            is_private: false,
            enable_mandatory_pin: false,
            room_id: None,
        }
    }

    pub fn dm(mut self) -> Self {
        self.is_dm = true;
        self.is_private = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn mandatory_pin(mut self) -> Self {
        self.enable_mandatory_pin = true;
        self
    }

    pub fn in_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }
}

/// View-model of a single chat thread
pub struct ChatState {
    info: ChatInfo,
    is_pinned: Observable<bool>,
    unread_count: Observable<UnreadCount>,
}

impl fmt::Debug for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatState")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("is_pinned", &self.is_pinned.get())
            .field("unread_count", &self.unread_count.get())
            .finish()
    }
}

impl ChatState {
    /// Create a chat; mandatory-pin chats always start pinned
    pub fn new(info: ChatInfo, is_pinned: bool) -> Self {
        let is_pinned = is_pinned || info.enable_mandatory_pin;
        Self {
            info,
            is_pinned: Observable::new(is_pinned),
            unread_count: Observable::new(UnreadCount::ZERO),
        }
    }

    pub fn id(&self) -> ChatId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ChatInfo {
        &self.info
    }

    pub fn is_dm(&self) -> bool {
        self.info.is_dm
    }

    pub fn is_private(&self) -> bool {
        self.info.is_private
    }

    pub fn enable_mandatory_pin(&self) -> bool {
        self.info.enable_mandatory_pin
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.info.room_id
    }

    /// Pin status stream
    pub fn is_pinned(&self) -> &Observable<bool> {
        &self.is_pinned
    }

    /// Unread count stream
    pub fn unread_count(&self) -> &Observable<UnreadCount> {
        &self.unread_count
    }

    /// Pin or unpin; returns whether the status changed.
    /// Mandatory-pin chats refuse to be unpinned.
    pub fn set_pinned(&self, pinned: bool) -> bool {
        if !pinned && self.info.enable_mandatory_pin {
            debug!(chat_id = %self.info.id, "Ignoring unpin of mandatory chat");
            return false;
        }
        self.is_pinned.set_if_changed(pinned)
    }

    /// Publish a new unread count
    pub fn set_unread_count(&self, count: UnreadCount) {
        self.unread_count.set_if_changed(count);
    }

    /// Display ordering: case-insensitive name, then id
    pub fn compare(a: &ChatState, b: &ChatState) -> Ordering {
        a.info
            .name
            .to_lowercase()
            .cmp(&b.info.name.to_lowercase())
            .then_with(|| a.info.id.cmp(&b.info.id))
    }
}

/// Snapshot of every known chat, keyed by id
pub type ChatMap = Arc<BTreeMap<ChatId, Arc<ChatState>>>;

/// Hook the sidebar installs so other views can open a chat in it
pub type OpenChatHook = Arc<dyn Fn(ChatId) + Send + Sync>;

/// Registry of chat view-models for one signed-in session
///
/// Constructed explicitly and shared as `Arc<GlobalChatState>`.
pub struct GlobalChatState {
    chats: Observable<ChatMap>,
    open_chat_hook: RwLock<Option<OpenChatHook>>,
    scope: SubscriptionScope,
    initialized: AtomicBool,
    torn_down: AtomicBool,
}

impl Default for GlobalChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalChatState {
    pub fn new() -> Self {
        Self {
            chats: Observable::new(Arc::new(BTreeMap::new())),
            open_chat_hook: RwLock::new(None),
            scope: SubscriptionScope::new(),
            initialized: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Start accepting chats. Idempotent.
    pub fn init(&self) -> RealtimeResult<()> {
        if self.torn_down.load(AtomicOrdering::SeqCst) {
            return Err(RealtimeError::TornDown);
        }
        if !self.initialized.swap(true, AtomicOrdering::SeqCst) {
            info!("Global chat state initialized");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(AtomicOrdering::SeqCst) && !self.torn_down.load(AtomicOrdering::SeqCst)
    }

    /// Drop every chat, close owned subscriptions and refuse new chats
    pub fn teardown(&self) {
        if self.torn_down.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        self.scope.close();
        *self.open_chat_hook.write() = None;
        self.chats.set(Arc::new(BTreeMap::new()));
        info!("Global chat state torn down");
    }

    /// Keep `subscription` alive until teardown
    pub fn retain_subscription(&self, subscription: Subscription) {
        self.scope.add(subscription);
    }

    /// Observable map of all chats
    pub fn chats(&self) -> &Observable<ChatMap> {
        &self.chats
    }

    /// Look up a chat
    pub fn chat(&self, id: ChatId) -> Option<Arc<ChatState>> {
        self.chats.get().get(&id).cloned()
    }

    /// Register a chat, or return the existing state for its id
    pub fn upsert_chat(&self, info: ChatInfo, is_pinned: bool) -> RealtimeResult<Arc<ChatState>> {
        if !self.is_initialized() {
            return Err(RealtimeError::TornDown);
        }
        if let Some(existing) = self.chat(info.id) {
            return Ok(existing);
        }

        let chat_id = info.id;
        let created = Arc::new(ChatState::new(info, is_pinned));
        let mut result = Arc::clone(&created);
        self.chats.update(|old| {
            if let Some(existing) = old.get(&chat_id) {
                // Lost a race with another upsert
                result = Arc::clone(existing);
                return Arc::clone(old);
            }
            let mut next = (**old).clone();
            next.insert(chat_id, Arc::clone(&created));
            Arc::new(next)
        });
        debug!(chat_id = %chat_id, "Registered chat");
        Ok(result)
    }

    /// Forget a chat
    pub fn remove_chat(&self, id: ChatId) -> RealtimeResult<()> {
        if self.chat(id).is_none() {
            return Err(RealtimeError::ChatNotFound(id));
        }
        self.chats.update(|old| {
            let mut next = (**old).clone();
            next.remove(&id);
            Arc::new(next)
        });
        Ok(())
    }

    /// Observe a single chat by id
    ///
    /// The callback receives `Some` once the chat is registered and `None`
    /// while it is not; it is only called when that changes.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn observe_chat_id(
        &self,
        id: ChatId,
        callback: impl Fn(Option<Arc<ChatState>>) + Send + Sync + 'static,
    ) -> Subscription {
        let last: Mutex<Option<Option<Arc<ChatState>>>> = Mutex::new(None);
        self.chats.subscribe(move |chats| {
            let current = chats.get(&id).cloned();
            let changed = {
                let mut last = last.lock();
                let changed = match (&*last, &current) {
                    (Some(Some(prev)), Some(cur)) => !Arc::ptr_eq(prev, cur),
                    (Some(None), None) => false,
                    _ => true,
                };
                if changed {
                    *last = Some(current.clone());
                }
                changed
            };
            if changed {
                callback(current);
            }
        })
    }

    /// Install the "open chat in sidebar" hook
    pub fn set_open_chat_in_sidebar(&self, hook: OpenChatHook) {
        *self.open_chat_hook.write() = Some(hook);
    }

    /// Ask the sidebar to open a chat; returns false when no sidebar is mounted
    pub fn open_chat_in_sidebar(&self, id: ChatId) -> bool {
        let hook = self.open_chat_hook.read().clone();
        match hook {
            Some(hook) => {
                hook(id);
                true
            }
            None => false,
        }
    }
}
