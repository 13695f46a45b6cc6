//! Request contexts stay isolated across threads and nested scopes

use std::thread;

use clowdr_core::{ConferenceId, RoomId};
use clowdr_logging::{RequestContext, RequestContextGuard};

#[test]
fn contexts_do_not_leak_between_threads() {
    let handles: Vec<_> = (0..16)
        .map(|_| {
            thread::spawn(|| {
                let room = RoomId::generate();
                let _guard = RequestContextGuard::new(RequestContext::new().with_room(room));
                for _ in 0..100 {
                    assert_eq!(RequestContextGuard::current_room_id(), Some(room));
                    thread::yield_now();
                }
                room
            })
        })
        .collect();

    let mut rooms: Vec<RoomId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    rooms.sort_by_key(|r| *r.as_uuid());
    rooms.dedup();
    assert_eq!(rooms.len(), 16);
    assert!(RequestContextGuard::current().is_none());
}

#[test]
fn deep_nesting_unwinds_in_order() {
    let conference = ConferenceId::generate();
    let rooms: Vec<RoomId> = (0..32).map(|_| RoomId::generate()).collect();

    fn descend(rooms: &[RoomId], conference: ConferenceId) {
        let Some((first, rest)) = rooms.split_first() else {
            return;
        };
        let _guard = RequestContextGuard::new(
            RequestContext::new()
                .with_room(*first)
                .with_conference(conference),
        );
        descend(rest, conference);
        assert_eq!(RequestContextGuard::current_room_id(), Some(*first));
    }

    descend(&rooms, conference);
    assert!(RequestContextGuard::current().is_none());
}

#[test]
fn span_helper_builds_request_span() {
    let context = RequestContext::new().with_room(RoomId::generate());
    let span = context.span("get_room_chime_meeting");
    let _entered = span.enter();
    tracing::info!("inside request span");
}
