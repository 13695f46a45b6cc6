//! Per-user notification fan-out
//!
//! Each user has a notifications room; every connection the user has open
//! joins it and receives everything sent to that user.

use std::pin::Pin;

use clowdr_core::{ChatId, UserId};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

const DEFAULT_CAPACITY: usize = 64;

/// A notification shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
}

/// Name of a user's notifications room
pub fn notifications_room_name(user_id: &UserId) -> String {
    format!("notifications:{}", user_id)
}

/// Convert a broadcast receiver into an async Stream.
///
/// Lagging receivers skip the missed notifications and keep going.
pub fn broadcast_to_stream<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(item) => yield item,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Notification rooms keyed by user
pub struct NotificationHub {
    rooms: DashMap<UserId, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Hub whose rooms buffer `capacity` notifications per slow receiver
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join a user's notifications room
    pub fn join(&self, user_id: &UserId) -> broadcast::Receiver<Notification> {
        self.rooms
            .entry(user_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Join a user's notifications room as a stream
    pub fn stream(&self, user_id: &UserId) -> Pin<Box<dyn Stream<Item = Notification> + Send>> {
        broadcast_to_stream(self.join(user_id))
    }

    /// Deliver `notification` to every connection of every listed user
    ///
    /// Returns how many connections received it. Rooms whose connections have
    /// all gone are dropped.
    pub fn send_notifications(&self, user_ids: &[UserId], notification: &Notification) -> usize {
        let mut delivered = 0;
        for user_id in user_ids {
            let Some(sender) = self.rooms.get(user_id).map(|room| room.value().clone()) else {
                trace!(room = %notifications_room_name(user_id), "No connections for user");
                continue;
            };
            match sender.send(notification.clone()) {
                Ok(receivers) => delivered += receivers,
                Err(_) => {
                    self.rooms
                        .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
                }
            }
        }
        debug!(users = user_ids.len(), delivered, "Sent notifications");
        delivered
    }

    /// Number of users with a room
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn note(title: &str) -> Notification {
        Notification {
            title: title.to_string(),
            subtitle: None,
            description: "New message".to_string(),
            link_url: Some("/conference/demo/chat".to_string()),
            chat_id: None,
        }
    }

    #[tokio::test]
    async fn test_every_connection_receives() {
        let hub = NotificationHub::new();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        let mut tab_one = hub.join(&alice);
        let mut tab_two = hub.join(&alice);
        let mut bob_rx = hub.join(&bob);

        let delivered = hub.send_notifications(&[alice.clone()], &note("hello"));
        assert_eq!(delivered, 2);
        assert_eq!(tab_one.recv().await.unwrap().title, "hello");
        assert_eq!(tab_two.recv().await.unwrap().title, "hello");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_rooms_are_pruned() {
        let hub = NotificationHub::new();
        let carol = UserId::new("carol").unwrap();
        drop(hub.join(&carol));
        assert_eq!(hub.room_count(), 1);

        assert_eq!(hub.send_notifications(&[carol], &note("gone")), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_notifications() {
        let hub = NotificationHub::new();
        let dave = UserId::new("dave").unwrap();
        let mut stream = hub.stream(&dave);

        hub.send_notifications(&[dave.clone()], &note("one"));
        hub.send_notifications(&[dave], &note("two"));

        assert_eq!(stream.next().await.map(|n| n.title), Some("one".to_string()));
        assert_eq!(stream.next().await.map(|n| n.title), Some("two".to_string()));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(note("x")).unwrap();
        assert_eq!(json["linkUrl"], "/conference/demo/chat");
        assert!(json.get("chatId").is_none());
    }
}
