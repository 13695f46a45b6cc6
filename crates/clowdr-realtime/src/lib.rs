//! # Clowdr Realtime
//!
//! Client-side state that keeps conference views live.
//!
//! - [`TimelineParameters`]: schedule viewport (position, zoom, event bounds)
//! - [`GlobalChatState`]: registry of chat view-models with pin and unread streams
//! - [`PinnedChats`] / [`RightSidebar`]: sidebar aggregation, grouping and tabs
//! - [`PresenceState`] / [`ParticipantList`]: who is on a page or in a room
//! - [`RegistrantSearch`]: debounced people search
//! - [`IdlePanel`]: room panel cache with idle eviction
//! - [`NotificationHub`]: per-user notification fan-out
//!
//! All state is shared through [`clowdr_core::Observable`]; subscriptions
//! are RAII handles.

pub mod chat;
pub mod error;
pub mod notifications;
pub mod panel;
pub mod presence;
pub mod search;
pub mod sidebar;
pub mod storage;
pub mod timeline;

pub use chat::{ChatInfo, ChatMap, ChatState, GlobalChatState, OpenChatHook, UnreadCount};
pub use error::{RealtimeError, RealtimeResult};
pub use notifications::{Notification, NotificationHub};
pub use panel::{IdlePanel, PANEL_IDLE_TIMEOUT};
pub use presence::{page_key, ParticipantDiff, ParticipantList, PresenceState, RoomParticipant};
pub use search::{RegistrantDirectory, RegistrantSearch, RegistrantSummary};
pub use sidebar::{PinnedChats, PinnedGroups, RightSidebar, SidebarPage, SidebarTab};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};
pub use timeline::{TimelineParameters, TimelineWindow};
