//! Observable values with explicit subscription handles
//!
//! Chat unread counts, pin status and presence sets are published through
//! [`Observable`]. Every subscription returns a [`Subscription`] that must be
//! kept alive for as long as the consumer wants updates; dropping it (or
//! calling [`Subscription::unsubscribe`]) removes the callback. Consumers that
//! hold many subscriptions put them in a [`SubscriptionScope`] or a
//! [`SubscriptionMap`] and close them at teardown.
//!
//! Callbacks run synchronously on the publishing thread, outside of any
//! internal lock, so a callback may freely read or publish other observables.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObservableInner<T> {
    value: RwLock<T>,
    subscribers: Mutex<BTreeMap<u64, Callback<T>>>,
    next_id: AtomicU64,
}

impl<T> ObservableInner<T> {
    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers.lock().contains_key(&id)
    }
}

/// A value that notifies subscribers whenever it is replaced
///
/// Cloning an `Observable` yields another handle to the same value.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.read())
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create an observable holding an initial value
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                value: RwLock::new(initial),
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Replace the value and notify every subscriber
    pub fn set(&self, value: T) {
        *self.inner.value.write() = value.clone();
        self.publish(&value);
    }

    /// Replace the value from the previous one and notify subscribers
    ///
    /// The read-modify-write happens under the value lock, so concurrent
    /// updates never lose each other's changes.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let mut guard = self.inner.value.write();
            let next = f(&guard);
            *guard = next.clone();
            next
        };
        self.publish(&next);
    }

    /// Subscribe to changes
    ///
    /// The callback is invoked immediately with the current value, then
    /// again on every change until the returned handle is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);
        self.inner
            .subscribers
            .lock()
            .insert(id, Arc::clone(&callback));

        let current = self.get();
        if self.inner.is_subscribed(id) {
            callback(&current);
        }

        let weak: Weak<ObservableInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().remove(&id);
            }
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Whether both handles share the same underlying value
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn publish(&self, value: &T) {
        let snapshot: Vec<(u64, Callback<T>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            // A previous callback in this round may have unsubscribed it
            if self.inner.is_subscribed(id) {
                callback(value);
            }
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Replace the value only if it differs, returning whether it changed
    pub fn set_if_changed(&self, value: T) -> bool {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return false;
            }
            *guard = value.clone();
        }
        self.publish(&value);
        true
    }
}

/// Handle to an active subscription
///
/// Unsubscribes when dropped. Call [`Subscription::unsubscribe`] to make the
/// teardown explicit at the call site.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a subscription that runs `teardown` when closed
    pub fn new(teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Whether teardown has not yet run
    pub fn is_active(&self) -> bool {
        self.teardown.is_some()
    }

    /// Unsubscribe now
    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owner for a group of subscriptions that share a lifetime
///
/// Once closed, any subscription added afterwards is torn down immediately,
/// so a late callback cannot leak a handle past teardown.
#[derive(Default)]
pub struct SubscriptionScope {
    subscriptions: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

impl SubscriptionScope {
    /// Create an open scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a subscription
    pub fn add(&self, subscription: Subscription) {
        if self.closed.load(Ordering::SeqCst) {
            subscription.unsubscribe();
            return;
        }
        self.subscriptions.lock().push(subscription);
    }

    /// Number of subscriptions held
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether the scope holds no subscriptions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`SubscriptionScope::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Unsubscribe everything held so far, keeping the scope open
    pub fn clear(&self) {
        let drained: Vec<Subscription> = std::mem::take(&mut *self.subscriptions.lock());
        drop(drained);
    }

    /// Unsubscribe everything and refuse further subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
    }
}

impl fmt::Debug for SubscriptionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionScope")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscriptions keyed by the entity they observe
///
/// Used where one subscription per entity must exist at most once, e.g. one
/// pin-status subscription per chat.
pub struct SubscriptionMap<K> {
    subscriptions: Mutex<HashMap<K, Subscription>>,
    closed: AtomicBool,
}

impl<K: Eq + Hash> Default for SubscriptionMap<K> {
    fn default() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<K: Eq + Hash + Clone> SubscriptionMap<K> {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a subscription exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.subscriptions.lock().contains_key(key)
    }

    /// Subscribe for `key` unless a subscription already exists
    ///
    /// `subscribe` is only called when the key is vacant; it runs outside the
    /// map lock so it may trigger callbacks that consult this map.
    pub fn insert_with(&self, key: K, subscribe: impl FnOnce() -> Subscription) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.contains(&key) {
            return false;
        }
        let subscription = subscribe();
        let mut guard = self.subscriptions.lock();
        if guard.contains_key(&key) || self.closed.load(Ordering::SeqCst) {
            drop(guard);
            subscription.unsubscribe();
            return false;
        }
        guard.insert(key, subscription);
        true
    }

    /// Unsubscribe and forget the subscription for `key`
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.subscriptions.lock().remove(key);
        removed.is_some()
    }

    /// Keep only the keys accepted by `keep`, unsubscribing the rest
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        let removed: Vec<Subscription> = {
            let mut guard = self.subscriptions.lock();
            let stale: Vec<K> = guard.keys().filter(|k| !keep(k)).cloned().collect();
            stale.iter().filter_map(|k| guard.remove(k)).collect()
        };
        drop(removed);
    }

    /// Number of subscriptions held
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unsubscribe everything and refuse further subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: HashMap<K, Subscription> = std::mem::take(&mut *self.subscriptions.lock());
        drop(drained);
    }
}

impl<K> Drop for SubscriptionMap<K> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        // Subscriptions drop with the map
    }
}
