//! Request context injection
//!
//! Handlers set the room/conference/user a request concerns through a
//! [`RequestContextGuard`]; the [`crate::layers::RequestContextLayer`] then
//! attaches it to every span opened in that scope, so error logs carry the
//! identifiers needed to trace a failure back to a room.
//!
//! The guard is thread-local. Async handlers that hop threads should use
//! [`RequestContext::span`] and instrument their future instead.

use std::cell::RefCell;

use clowdr_core::{ConferenceId, RoomId, UserId};
use tracing::field;
use uuid::Uuid;

/// Identifiers describing what a unit of work is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Unique id for this request
    pub request_id: Uuid,
    /// Room the request concerns
    pub room_id: Option<RoomId>,
    /// Conference the request concerns
    pub conference_id: Option<ConferenceId>,
    /// Authenticated caller
    pub user_id: Option<UserId>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Fresh context with a random request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            room_id: None,
            conference_id: None,
            user_id: None,
        }
    }

    /// Attach a room id
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Attach a conference id
    pub fn with_conference(mut self, conference_id: ConferenceId) -> Self {
        self.conference_id = Some(conference_id);
        self
    }

    /// Attach the caller
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Build an `info` span carrying this context's fields
    pub fn span(&self, name: &'static str) -> tracing::Span {
        let span = tracing::info_span!(
            "request",
            operation = name,
            request_id = %self.request_id,
            room_id = field::Empty,
            conference_id = field::Empty,
            user_id = field::Empty,
        );
        if let Some(room_id) = &self.room_id {
            span.record("room_id", field::display(room_id));
        }
        if let Some(conference_id) = &self.conference_id {
            span.record("conference_id", field::display(conference_id));
        }
        if let Some(user_id) = &self.user_id {
            span.record("user_id", field::display(user_id));
        }
        span
    }
}

thread_local! {
    static REQUEST_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// RAII guard for request context
///
/// When this guard is created, it sets the request context for the current thread.
/// When it's dropped, it restores the previous context (if any).
///
/// # Example
///
/// ```ignore
/// use clowdr_logging::context::{RequestContext, RequestContextGuard};
///
/// let _guard = RequestContextGuard::new(RequestContext::new().with_room(room_id));
/// tracing::warn!("Chime meeting no longer exists, deleting record");
/// ```
pub struct RequestContextGuard {
    previous: Option<RequestContext>,
}

impl RequestContextGuard {
    /// Install `context` for the current scope
    pub fn new(context: RequestContext) -> Self {
        let previous = REQUEST_CONTEXT.with(|ctx| ctx.borrow_mut().replace(context));
        Self { previous }
    }

    /// Get the current request context (if any)
    pub fn current() -> Option<RequestContext> {
        REQUEST_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current room id (if set)
    pub fn current_room_id() -> Option<RoomId> {
        Self::current().and_then(|ctx| ctx.room_id)
    }

    /// Get the current request id (if set)
    pub fn current_request_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.request_id)
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        REQUEST_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Convenience macro to run a block with a request context installed
///
/// # Example
///
/// ```ignore
/// with_request_context!(RequestContext::new().with_room(room_id), {
///     tracing::info!("Creating new breakout room");
/// });
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($context:expr, $body:block) => {{
        let _guard = $crate::context::RequestContextGuard::new($context);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_guard() {
        assert!(RequestContextGuard::current().is_none());

        let room = RoomId::generate();
        {
            let _guard = RequestContextGuard::new(RequestContext::new().with_room(room));
            assert_eq!(RequestContextGuard::current_room_id(), Some(room));
        }

        assert!(RequestContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts_restore() {
        let outer_room = RoomId::generate();
        let inner_room = RoomId::generate();

        {
            let _outer = RequestContextGuard::new(RequestContext::new().with_room(outer_room));
            {
                let _inner = RequestContextGuard::new(RequestContext::new().with_room(inner_room));
                assert_eq!(RequestContextGuard::current_room_id(), Some(inner_room));
            }
            assert_eq!(RequestContextGuard::current_room_id(), Some(outer_room));
        }

        assert!(RequestContextGuard::current_room_id().is_none());
    }

    #[test]
    fn test_macro_scopes_context() {
        let conference = ConferenceId::generate();
        let seen = with_request_context!(RequestContext::new().with_conference(conference), {
            RequestContextGuard::current().and_then(|c| c.conference_id)
        });
        assert_eq!(seen, Some(conference));
        assert!(RequestContextGuard::current().is_none());
    }
}
