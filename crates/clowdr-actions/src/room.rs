//! Room and meeting orchestration
//!
//! A room gets its Chime meeting lazily. Every retrieval validates the
//! stored record (shape, then a provider existence check); invalid records
//! are deleted and a new meeting is created. Retrievals for the same room
//! are serialized so concurrent joiners share a single provider session.

use std::sync::Arc;

use clowdr_core::{AttendeeId, ConferenceId, ContentGroupId, RoomId};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::error::{ActionsError, ActionsResult};
use crate::model::{BREAKOUT_ROOM_CAPACITY, NewMeetingRecord, NewRoom, RoomMode, RoomPrivacy, RoomRef};
use crate::provider::{Meeting, MeetingProvider};
use crate::retry::call_with_retry;
use crate::store::RoomStore;

pub struct RoomService {
    store: Arc<dyn RoomStore>,
    provider: Arc<dyn MeetingProvider>,
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl RoomService {
    pub fn new(store: Arc<dyn RoomStore>, provider: Arc<dyn MeetingProvider>) -> Self {
        Self {
            store,
            provider,
            room_locks: DashMap::new(),
        }
    }

    /// Room for a content group's breakout discussions
    ///
    /// Reuses the group's oldest room that was not created for an event,
    /// otherwise creates a public breakout room named after the group.
    #[instrument(skip(self), fields(content_group_id = %content_group_id, conference_id = %conference_id))]
    pub async fn create_content_group_breakout_room(
        &self,
        content_group_id: ContentGroupId,
        conference_id: ConferenceId,
    ) -> ActionsResult<RoomId> {
        let group = self
            .store
            .content_group(content_group_id)
            .await?
            .filter(|group| group.conference_id == conference_id)
            .ok_or_else(|| {
                ActionsError::failed("Could not find specified content group in the conference")
            })?;

        if let Some(room_id) = group.rooms.first() {
            return Ok(*room_id);
        }

        info!("Creating new breakout room for content group");
        let room_id = self
            .store
            .insert_room(NewRoom {
                conference_id,
                name: group.title,
                capacity: BREAKOUT_ROOM_CAPACITY,
                chat_id: group.chat_id,
                mode: RoomMode::Breakout,
                privacy: RoomPrivacy::Public,
                originating_content_group_id: Some(content_group_id),
            })
            .await?;
        Ok(room_id)
    }

    pub async fn get_room_conference_id(&self, room_id: RoomId) -> ActionsResult<ConferenceId> {
        self.store
            .room(room_id)
            .await?
            .map(|room| room.conference_id)
            .ok_or_else(|| ActionsError::failed("Could not find room"))
    }

    /// Whether the attendee may join the room's video
    pub async fn can_user_join_room(
        &self,
        attendee_id: AttendeeId,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> ActionsResult<bool> {
        let store = Arc::clone(&self.store);
        let allowed = call_with_retry(|| {
            let store = Arc::clone(&store);
            async move {
                store
                    .attendee_can_join(attendee_id, room_id, conference_id)
                    .await
            }
        })
        .await?;
        Ok(allowed)
    }

    /// Create a provider meeting and record it against the room
    #[instrument(skip(self), fields(room_id = %room_id, conference_id = %conference_id))]
    pub async fn create_room_chime_meeting(
        &self,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> ActionsResult<Meeting> {
        let meeting = self.provider.create_meeting(room_id).await?;

        let Some(meeting_id) = meeting.id().map(str::to_string) else {
            error!("Failed to create a room Chime meeting: provider returned no meeting id");
            return Err(ActionsError::Provider("Meeting has no id".into()));
        };

        let record = NewMeetingRecord {
            room_id,
            conference_id,
            chime_meeting_id: meeting_id,
            chime_meeting_data: serde_json::to_value(&meeting)?,
        };
        if let Err(e) = self.store.insert_meeting_record(record).await {
            error!(error = %e, "Failed to create a room Chime meeting");
            return Err(e.into());
        }

        Ok(meeting)
    }

    /// The room's stored meeting, if it is still valid
    ///
    /// Records that fail validation are deleted.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn get_existing_room_chime_meeting(
        &self,
        room_id: RoomId,
    ) -> ActionsResult<Option<Meeting>> {
        let records = self.store.meeting_records(room_id).await?;
        let [record] = records.as_slice() else {
            return Ok(None);
        };

        let Some(meeting) = Meeting::validate(&record.chime_meeting_data) else {
            warn!(data = %record.chime_meeting_data, "Retrieved Chime meeting data could not be validated, deleting record");
            self.store.delete_meeting_record(record.id).await?;
            return Ok(None);
        };

        let meeting_id = meeting.id().unwrap_or_default();
        if !self.provider.meeting_exists(meeting_id).await? {
            warn!(meeting_id, "Chime meeting no longer exists, deleting record");
            self.store.delete_meeting_record(record.id).await?;
            return Ok(None);
        }

        Ok(Some(meeting))
    }

    /// The room's meeting, creating one when there is no valid record
    pub async fn get_room_chime_meeting(
        &self,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> ActionsResult<Meeting> {
        let lock = Arc::clone(self.room_locks.entry(room_id).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.get_or_create_meeting(room_id, conference_id).await
        };
        drop(lock);
        self.room_locks
            .remove_if(&room_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn get_or_create_meeting(
        &self,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> ActionsResult<Meeting> {
        if let Some(meeting) = self.get_existing_room_chime_meeting(room_id).await? {
            return Ok(meeting);
        }

        match self.create_room_chime_meeting(room_id, conference_id).await {
            Ok(meeting) => Ok(meeting),
            Err(e) => {
                // Another instance may have won the race to create it
                if let Some(meeting) = self.get_existing_room_chime_meeting(room_id).await? {
                    return Ok(meeting);
                }
                error!(error = %e, room_id = %room_id, conference_id = %conference_id, "Could not get Chime meeting data");
                Err(ActionsError::failed("Could not get Chime meeting data"))
            }
        }
    }

    /// The room's public Vonage session id
    pub async fn get_room_vonage_meeting(&self, room_id: RoomId) -> ActionsResult<Option<String>> {
        Ok(self
            .store
            .room(room_id)
            .await?
            .and_then(|room| room.public_vonage_session_id))
    }

    pub async fn get_room_by_vonage_session_id(
        &self,
        session_id: &str,
    ) -> ActionsResult<Option<RoomRef>> {
        Ok(single(self.store.rooms_by_vonage_session(session_id).await?))
    }

    pub async fn get_room_by_chime_meeting_id(
        &self,
        meeting_id: &str,
    ) -> ActionsResult<Option<RoomRef>> {
        Ok(single(self.store.rooms_by_chime_meeting(meeting_id).await?))
    }
}

/// The only element, or `None` when there are zero or several
fn single<T>(mut items: Vec<T>) -> Option<T> {
    if items.len() == 1 { items.pop() } else { None }
}
