//! # Clowdr Actions
//!
//! HTTP service behind Hasura actions and event triggers.
//!
//! Every route except `GET /` requires the shared event secret; user-facing
//! actions additionally require an Auth0 bearer token. Work is delegated to
//! services over the [`store`] traits:
//!
//! - [`RoomService`]: breakout rooms, join checks and lazily created,
//!   self-healing Chime meetings
//! - [`InvitationService`]: invitation and confirmation emails, claiming
//! - [`UploadService`]: submission requests to uploaders
//! - [`EmailDispatcher`]: delivery of queued emails
//!
//! ```ignore
//! let state = AppState::new(config, Arc::new(MemoryStore::new()), provider, sender, clock);
//! let app = build_router(state);
//! ```

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod event;
pub mod handlers;
pub mod hasura;
pub mod invitation;
pub mod model;
pub mod provider;
pub mod retry;
pub mod room;
pub mod server;
pub mod store;
pub mod upload;

pub use auth::{AuthenticatedUser, JwtVerifier};
pub use config::{ActionsConfig, ChimeConfig, ConfigError};
pub use email::{EmailDispatcher, EmailSender, LogOnlySender, SendGridSender};
pub use error::{ActionsError, ActionsResult};
pub use hasura::HasuraClient;
pub use invitation::InvitationService;
pub use provider::{ChimeProvider, DisabledProvider, Meeting, MeetingProvider};
pub use retry::{RetryPolicy, call_with_retry};
pub use room::RoomService;
pub use server::{AppState, build_router, serve};
pub use store::{DataStore, MemoryStore};
pub use upload::UploadService;
