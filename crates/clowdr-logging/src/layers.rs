//! Custom tracing layers
//!
//! This module provides the layer that attaches the active
//! [`RequestContext`](crate::context::RequestContext) to new spans.

use tracing::{span, Subscriber};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{RequestContext, RequestContextGuard};

/// Layer that attaches request context to spans
///
/// Spans opened while a [`RequestContextGuard`] is active carry a
/// [`RequestContextExtension`] that later layers (and tests) can read back.
pub struct RequestContextLayer;

impl RequestContextLayer {
    /// Create a new request context layer
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct RequestContextExtension {
    pub data: RequestContext,
}

impl<S> Layer<S> for RequestContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(request_ctx) = RequestContextGuard::current() {
                span.extensions_mut()
                    .insert(RequestContextExtension { data: request_ctx });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clowdr_core::RoomId;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    /// Records the room id found on each new span's extensions
    struct Probe(Arc<Mutex<Vec<Option<RoomId>>>>);

    impl<S> Layer<S> for Probe
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
            if let Some(span) = ctx.span(id) {
                let room = span
                    .extensions()
                    .get::<RequestContextExtension>()
                    .and_then(|ext| ext.data.room_id);
                self.0.lock().unwrap().push(room);
            }
        }
    }

    #[test]
    fn test_spans_pick_up_active_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(RequestContextLayer::new())
            .with(Probe(Arc::clone(&seen)));

        let room = RoomId::generate();
        tracing::subscriber::with_default(subscriber, || {
            let _outside = tracing::info_span!("outside").entered();
            let _guard = RequestContextGuard::new(RequestContext::new().with_room(room));
            let _inside = tracing::info_span!("inside").entered();
        });

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(room)]);
    }
}
