//! Room panel cache with idle eviction
//!
//! The presence panel keeps the participants view of the last room it
//! showed. Closing the panel starts a timer; if it stays closed for
//! [`PANEL_IDLE_TIMEOUT`] the cached contents are dropped. Reopening
//! cancels the timer.

use std::sync::Arc;
use std::time::Duration;

use clowdr_core::RoomId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

/// How long a closed panel keeps its contents
pub const PANEL_IDLE_TIMEOUT: Duration = Duration::from_millis(5000);

type Contents<T> = Arc<Mutex<Option<(RoomId, T)>>>;

pub struct IdlePanel<T> {
    contents: Contents<T>,
    eviction: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl<T: Clone + Send + 'static> Default for IdlePanel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> IdlePanel<T> {
    pub fn new() -> Self {
        Self::with_timeout(PANEL_IDLE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            contents: Arc::new(Mutex::new(None)),
            eviction: Mutex::new(None),
            timeout,
        }
    }

    /// Report the panel's visibility and the room being viewed
    ///
    /// While open, contents are (re)built whenever the room changes. Closing
    /// schedules eviction on the current Tokio runtime, or evicts at once
    /// when there is none.
    pub fn set_open(&self, is_open: bool, room_id: Option<RoomId>, build: impl FnOnce(RoomId) -> T) {
        if let Some(pending) = self.eviction.lock().take() {
            pending.abort();
        }

        if is_open {
            if let Some(room_id) = room_id {
                let mut contents = self.contents.lock();
                if contents.as_ref().map(|(id, _)| *id) != Some(room_id) {
                    trace!(room_id = %room_id, "Building room panel");
                    *contents = Some((room_id, build(room_id)));
                }
            }
            return;
        }

        let contents = Arc::clone(&self.contents);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let timeout = self.timeout;
                let task = handle.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    trace!("Evicting idle room panel");
                    contents.lock().take();
                });
                *self.eviction.lock() = Some(task);
            }
            Err(_) => {
                contents.lock().take();
            }
        }
    }

    /// Cached contents, if any
    pub fn contents(&self) -> Option<(RoomId, T)> {
        self.contents.lock().clone()
    }
}

impl<T> Drop for IdlePanel<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.eviction.lock().take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_closed_panel_is_evicted_after_timeout() {
        let panel: IdlePanel<String> = IdlePanel::new();
        let room = RoomId::generate();
        panel.set_open(true, Some(room), |id| id.short());
        assert_eq!(panel.contents().map(|(id, _)| id), Some(room));

        panel.set_open(false, Some(room), |_| String::new());
        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert!(panel.contents().is_some());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        tokio::task::yield_now().await;
        assert!(panel.contents().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_cancels_eviction() {
        let panel: IdlePanel<u32> = IdlePanel::new();
        let room = RoomId::generate();
        let mut builds = 0;
        panel.set_open(true, Some(room), |_| {
            builds += 1;
            7
        });
        panel.set_open(false, None, |_| 0);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        panel.set_open(true, Some(room), |_| {
            builds += 1;
            8
        });
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(panel.contents().map(|(_, v)| v), Some(7));
        assert_eq!(builds, 1);
    }

    #[test]
    fn test_closing_without_runtime_evicts_at_once() {
        let panel: IdlePanel<u8> = IdlePanel::new();
        panel.set_open(true, Some(RoomId::generate()), |_| 1);
        panel.set_open(false, None, |_| 0);
        assert!(panel.contents().is_none());
    }
}
