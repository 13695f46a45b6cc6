//! # Clowdr Core
//!
//! Shared vocabulary for the Clowdr conference platform crates.
//!
//! ## Key Types
//!
//! - [`RoomId`], [`ConferenceId`], [`ChatId`], [`UserId`] and friends: typed identifiers
//! - [`Observable`]: a value with publish/subscribe change notification
//! - [`Subscription`]: RAII handle that unsubscribes on drop
//! - [`SubscriptionScope`]: owner that closes many subscriptions at teardown
//! - [`Clock`]: time abstraction for testability
//! - [`LayoutDataBlob`]: layout metadata attached to content elements
//! - [`sigv4`]: AWS Signature Version 4 signing for the AWS adapters

pub mod clock;
pub mod error;
pub mod ids;
pub mod layout;
pub mod observable;
pub mod sigv4;

pub use clock::*;
pub use error::*;
pub use ids::*;
pub use layout::*;
pub use observable::*;
