//! A signed-in session: chats arrive, get pinned, collect unread messages,
//! and the sidebar reflects it all; state survives a restart through storage.

use std::sync::Arc;

use clowdr_core::{ChatId, ManualClock, RoomId};
use clowdr_realtime::timeline::LAST_START_TIME_KEY;
use clowdr_realtime::{
    ChatInfo, FileStorage, GlobalChatState, LocalStorage, PinnedChats, RightSidebar, SidebarPage,
    SidebarTab, TimelineParameters, UnreadCount,
};
use parking_lot::Mutex;

#[test]
fn pinned_unread_flows_to_sidebar_badge() {
    clowdr_logging::init_testing();

    let chat_state = Arc::new(GlobalChatState::new());
    chat_state.init().unwrap();
    let pinned = PinnedChats::attach(&chat_state);

    let badges = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&badges);
    let _badge = pinned.subscribe_unread(move |count| sink.lock().push(count.to_string()));

    let lobby = chat_state
        .upsert_chat(ChatInfo::new(ChatId::generate(), "Lobby").mandatory_pin(), false)
        .unwrap();
    let dm = chat_state
        .upsert_chat(ChatInfo::new(ChatId::generate(), "Ada").dm(), true)
        .unwrap();
    let _muted = chat_state
        .upsert_chat(ChatInfo::new(ChatId::generate(), "Random"), false)
        .unwrap();

    lobby.set_unread_count(UnreadCount::Count(1));
    dm.set_unread_count(UnreadCount::Count(2));
    dm.set_unread_count(UnreadCount::Overflow);

    let groups = pinned.groups().unwrap();
    assert_eq!(groups.mandatory.len(), 1);
    assert_eq!(groups.direct_messages.len(), 1);
    assert!(groups.others.is_empty());

    assert_eq!(badges.lock().last().map(String::as_str), Some("10+"));
    assert!(badges.lock().contains(&"3".to_string()));

    chat_state.teardown();
    assert!(pinned.pinned().unwrap().is_empty());
    assert_eq!(pinned.unread(), UnreadCount::ZERO);
}

#[test]
fn sidebar_and_timeline_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local-storage.json");
    let clock = ManualClock::at_millis(1_000_000);

    {
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::open(&path).unwrap());
        let sidebar = RightSidebar::new(Arc::clone(&storage));
        sidebar.set_page(SidebarPage::Room(RoomId::generate()));
        sidebar.select_index(2);
        assert_eq!(sidebar.current_tab(), SidebarTab::Presence);

        let timeline = TimelineParameters::restore(Arc::clone(&storage), &clock);
        timeline.notify_event_start(0);
        timeline.notify_event_end(48 * 60 * 60 * 1000);
        timeline.shift_to(6 * 60 * 60 * 1000);
    }

    let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::open(&path).unwrap());
    assert_eq!(
        storage.get_item(LAST_START_TIME_KEY).unwrap(),
        Some((6 * 60 * 60 * 1000).to_string())
    );

    let sidebar = RightSidebar::new(Arc::clone(&storage));
    assert_eq!(sidebar.current_tab(), SidebarTab::Presence);
    assert_eq!(sidebar.tab_index(), 1);

    let timeline = TimelineParameters::restore(storage, &clock);
    assert_eq!(timeline.window().start_time_ms(), 6 * 60 * 60 * 1000);
}
