//! Data layer seams
//!
//! The service talks to the data layer through these traits. Production
//! uses [`crate::hasura::HasuraClient`]; tests and local runs use
//! [`MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clowdr_core::{
    AttendeeId, ConferenceId, ContentGroupId, EmailId, InvitationId, MeetingRecordId,
    RequiredItemId, RoomId, StoreError, UploaderId, UserId,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{
    Attendee, Conference, ContentGroup, Email, Invitation, InvitationDetails, MeetingRecord,
    NewEmail, NewMeetingRecord, NewRoom, RequiredItem, Room, RoomRef, Uploader, User,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn content_group(&self, id: ContentGroupId) -> StoreResult<Option<ContentGroup>>;

    async fn insert_room(&self, room: NewRoom) -> StoreResult<RoomId>;

    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>>;

    /// Whether the room is visible to the attendee (public, or the attendee
    /// is a member) and the attendee may view other attendees
    async fn attendee_can_join(
        &self,
        attendee_id: AttendeeId,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> StoreResult<bool>;

    async fn meeting_records(&self, room_id: RoomId) -> StoreResult<Vec<MeetingRecord>>;

    /// Fails with [`StoreError::Conflict`] when the room already has a record
    async fn insert_meeting_record(&self, record: NewMeetingRecord) -> StoreResult<MeetingRecordId>;

    async fn delete_meeting_record(&self, id: MeetingRecordId) -> StoreResult<()>;

    async fn rooms_by_vonage_session(&self, session_id: &str) -> StoreResult<Vec<RoomRef>>;

    async fn rooms_by_chime_meeting(&self, meeting_id: &str) -> StoreResult<Vec<RoomRef>>;
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn invitations_for_attendees(
        &self,
        attendee_ids: &[AttendeeId],
    ) -> StoreResult<Vec<InvitationDetails>>;

    async fn invitation_by_code(&self, invite_code: Uuid) -> StoreResult<Option<InvitationDetails>>;

    async fn set_confirmation(
        &self,
        invitation_id: InvitationId,
        confirmation_code: Uuid,
        link_to_user_id: UserId,
    ) -> StoreResult<()>;

    /// Attach the attendee to a user account
    async fn link_attendee(&self, attendee_id: AttendeeId, user_id: UserId) -> StoreResult<()>;

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait EmailStore: Send + Sync {
    async fn insert_emails(&self, emails: Vec<NewEmail>) -> StoreResult<Vec<EmailId>>;

    async fn mark_sent(&self, id: EmailId, sent_at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait UploaderStore: Send + Sync {
    async fn uploaders(&self, ids: &[UploaderId]) -> StoreResult<Vec<(Uploader, RequiredItem)>>;

    async fn record_emails_sent(&self, ids: &[UploaderId]) -> StoreResult<()>;
}

/// Everything the service needs from the data layer
pub trait DataStore: RoomStore + InvitationStore + EmailStore + UploaderStore {}

impl<T: RoomStore + InvitationStore + EmailStore + UploaderStore> DataStore for T {}

/// In-memory data layer
#[derive(Default)]
pub struct MemoryStore {
    conferences: DashMap<ConferenceId, Conference>,
    rooms: DashMap<RoomId, (Room, chrono::DateTime<Utc>)>,
    room_members: DashMap<RoomId, Vec<AttendeeId>>,
    view_attendee_permission: DashMap<(ConferenceId, AttendeeId), ()>,
    content_groups: DashMap<ContentGroupId, (ConferenceId, String, Option<clowdr_core::ChatId>)>,
    meetings: DashMap<RoomId, MeetingRecord>,
    attendees: DashMap<AttendeeId, Attendee>,
    users: DashMap<UserId, User>,
    invitations: DashMap<InvitationId, Invitation>,
    emails: RwLock<Vec<Email>>,
    required_items: DashMap<RequiredItemId, RequiredItem>,
    uploaders: DashMap<UploaderId, Uploader>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conference(&self, conference: Conference) {
        self.conferences.insert(conference.id, conference);
    }

    pub fn add_room(&self, room: Room) {
        self.rooms.insert(room.id, (room, Utc::now()));
    }

    pub fn add_room_member(&self, room_id: RoomId, attendee_id: AttendeeId) {
        self.room_members.entry(room_id).or_default().push(attendee_id);
    }

    /// Grant `CONFERENCE_VIEW_ATTENDEES` to an attendee
    pub fn grant_view_attendees(&self, conference_id: ConferenceId, attendee_id: AttendeeId) {
        self.view_attendee_permission
            .insert((conference_id, attendee_id), ());
    }

    pub fn add_content_group(
        &self,
        id: ContentGroupId,
        conference_id: ConferenceId,
        title: impl Into<String>,
        chat_id: Option<clowdr_core::ChatId>,
    ) {
        self.content_groups
            .insert(id, (conference_id, title.into(), chat_id));
    }

    pub fn add_attendee(&self, attendee: Attendee) {
        self.attendees.insert(attendee.id, attendee);
    }

    pub fn add_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn add_invitation(&self, invitation: Invitation) {
        self.invitations.insert(invitation.id, invitation);
    }

    pub fn add_required_item(&self, item: RequiredItem) {
        self.required_items.insert(item.id, item);
    }

    pub fn add_uploader(&self, uploader: Uploader) {
        self.uploaders.insert(uploader.id, uploader);
    }

    /// Store a meeting record as-is, bypassing validation
    pub fn put_meeting_record(&self, record: MeetingRecord) {
        self.meetings.insert(record.room_id, record);
    }

    pub fn attendee(&self, id: AttendeeId) -> Option<Attendee> {
        self.attendees.get(&id).map(|a| a.clone())
    }

    pub fn invitation(&self, id: InvitationId) -> Option<Invitation> {
        self.invitations.get(&id).map(|i| i.clone())
    }

    pub fn uploader(&self, id: UploaderId) -> Option<Uploader> {
        self.uploaders.get(&id).map(|u| u.clone())
    }

    /// Snapshot of every queued email
    pub fn emails(&self) -> Vec<Email> {
        self.emails.read().clone()
    }

    fn details(&self, invitation: &Invitation) -> StoreResult<InvitationDetails> {
        let attendee = self
            .attendees
            .get(&invitation.attendee_id)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::NotFound(format!("attendee {}", invitation.attendee_id)))?;
        let conference = self
            .conferences
            .get(&attendee.conference_id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::NotFound(format!("conference {}", attendee.conference_id)))?;
        let emails_sent = self
            .emails
            .read()
            .iter()
            .filter(|e| e.invitation_id == Some(invitation.id))
            .count() as u32;
        Ok(InvitationDetails {
            invitation: Invitation {
                emails_sent,
                ..invitation.clone()
            },
            attendee,
            conference,
        })
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn content_group(&self, id: ContentGroupId) -> StoreResult<Option<ContentGroup>> {
        let Some(entry) = self.content_groups.get(&id) else {
            return Ok(None);
        };
        let (conference_id, title, chat_id) = entry.clone();
        drop(entry);

        let mut rooms: Vec<(chrono::DateTime<Utc>, RoomId)> = self
            .rooms
            .iter()
            .filter(|r| {
                let (room, _) = r.value();
                room.originating_content_group_id == Some(id) && room.originating_event_id.is_none()
            })
            .map(|r| (r.value().1, r.value().0.id))
            .collect();
        rooms.sort();

        Ok(Some(ContentGroup {
            id,
            conference_id,
            title,
            chat_id,
            rooms: rooms.into_iter().map(|(_, id)| id).collect(),
        }))
    }

    async fn insert_room(&self, room: NewRoom) -> StoreResult<RoomId> {
        let id = RoomId::generate();
        self.add_room(Room {
            id,
            conference_id: room.conference_id,
            name: room.name,
            capacity: Some(room.capacity),
            chat_id: room.chat_id,
            mode: room.mode,
            privacy: room.privacy,
            originating_content_group_id: room.originating_content_group_id,
            originating_event_id: None,
            public_vonage_session_id: None,
        });
        Ok(id)
    }

    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        Ok(self.rooms.get(&id).map(|r| r.value().0.clone()))
    }

    async fn attendee_can_join(
        &self,
        attendee_id: AttendeeId,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> StoreResult<bool> {
        let in_conference = self
            .attendees
            .get(&attendee_id)
            .is_some_and(|a| a.conference_id == conference_id);
        let room_visible = self.rooms.get(&room_id).is_some_and(|r| {
            let room = &r.value().0;
            room.conference_id == conference_id
                && (room.privacy == crate::model::RoomPrivacy::Public
                    || self
                        .room_members
                        .get(&room_id)
                        .is_some_and(|m| m.contains(&attendee_id)))
        });
        let may_view = self
            .view_attendee_permission
            .contains_key(&(conference_id, attendee_id));
        Ok(in_conference && room_visible && may_view)
    }

    async fn meeting_records(&self, room_id: RoomId) -> StoreResult<Vec<MeetingRecord>> {
        Ok(self
            .meetings
            .get(&room_id)
            .map(|r| vec![r.clone()])
            .unwrap_or_default())
    }

    async fn insert_meeting_record(&self, record: NewMeetingRecord) -> StoreResult<MeetingRecordId> {
        use dashmap::mapref::entry::Entry;

        match self.meetings.entry(record.room_id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "room_RoomChimeMeeting for room {}",
                record.room_id
            ))),
            Entry::Vacant(slot) => {
                let id = MeetingRecordId::generate();
                slot.insert(MeetingRecord {
                    id,
                    room_id: record.room_id,
                    conference_id: record.conference_id,
                    chime_meeting_id: record.chime_meeting_id,
                    chime_meeting_data: record.chime_meeting_data,
                });
                Ok(id)
            }
        }
    }

    async fn delete_meeting_record(&self, id: MeetingRecordId) -> StoreResult<()> {
        self.meetings.retain(|_, record| record.id != id);
        Ok(())
    }

    async fn rooms_by_vonage_session(&self, session_id: &str) -> StoreResult<Vec<RoomRef>> {
        Ok(self
            .rooms
            .iter()
            .filter(|r| r.value().0.public_vonage_session_id.as_deref() == Some(session_id))
            .map(|r| RoomRef {
                room_id: r.value().0.id,
                conference_id: r.value().0.conference_id,
            })
            .collect())
    }

    async fn rooms_by_chime_meeting(&self, meeting_id: &str) -> StoreResult<Vec<RoomRef>> {
        Ok(self
            .meetings
            .iter()
            .filter(|m| m.value().chime_meeting_id == meeting_id)
            .map(|m| RoomRef {
                room_id: m.value().room_id,
                conference_id: m.value().conference_id,
            })
            .collect())
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn invitations_for_attendees(
        &self,
        attendee_ids: &[AttendeeId],
    ) -> StoreResult<Vec<InvitationDetails>> {
        let matching: Vec<Invitation> = self
            .invitations
            .iter()
            .filter(|i| attendee_ids.contains(&i.value().attendee_id))
            .map(|i| i.value().clone())
            .collect();
        matching.iter().map(|i| self.details(i)).collect()
    }

    async fn invitation_by_code(&self, invite_code: Uuid) -> StoreResult<Option<InvitationDetails>> {
        let found = self
            .invitations
            .iter()
            .find(|i| i.value().invite_code == invite_code)
            .map(|i| i.value().clone());
        found.map(|i| self.details(&i)).transpose()
    }

    async fn set_confirmation(
        &self,
        invitation_id: InvitationId,
        confirmation_code: Uuid,
        link_to_user_id: UserId,
    ) -> StoreResult<()> {
        let mut invitation = self
            .invitations
            .get_mut(&invitation_id)
            .ok_or_else(|| StoreError::NotFound(format!("invitation {}", invitation_id)))?;
        invitation.confirmation_code = Some(confirmation_code);
        invitation.link_to_user_id = Some(link_to_user_id);
        Ok(())
    }

    async fn link_attendee(&self, attendee_id: AttendeeId, user_id: UserId) -> StoreResult<()> {
        let mut attendee = self
            .attendees
            .get_mut(&attendee_id)
            .ok_or_else(|| StoreError::NotFound(format!("attendee {}", attendee_id)))?;
        match &attendee.user_id {
            Some(existing) if *existing != user_id => Err(StoreError::Conflict(format!(
                "attendee {} already linked",
                attendee_id
            ))),
            _ => {
                attendee.user_id = Some(user_id);
                Ok(())
            }
        }
    }

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }
}

#[async_trait]
impl EmailStore for MemoryStore {
    async fn insert_emails(&self, emails: Vec<NewEmail>) -> StoreResult<Vec<EmailId>> {
        let mut stored = self.emails.write();
        Ok(emails
            .into_iter()
            .map(|email| {
                let id = EmailId::generate();
                stored.push(Email {
                    id,
                    user_id: email.user_id,
                    invitation_id: email.invitation_id,
                    email_address: email.email_address,
                    reason: email.reason,
                    subject: email.subject,
                    html_contents: email.html_contents,
                    plain_text_contents: email.plain_text_contents,
                    sent_at: None,
                });
                id
            })
            .collect())
    }

    async fn mark_sent(&self, id: EmailId, sent_at: DateTime<Utc>) -> StoreResult<()> {
        let mut emails = self.emails.write();
        let email = emails
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("email {}", id)))?;
        email.sent_at = Some(sent_at);
        Ok(())
    }
}

#[async_trait]
impl UploaderStore for MemoryStore {
    async fn uploaders(&self, ids: &[UploaderId]) -> StoreResult<Vec<(Uploader, RequiredItem)>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.uploaders.get(id).map(|u| u.clone()))
            .filter_map(|uploader| {
                self.required_items
                    .get(&uploader.required_item_id)
                    .map(|item| (uploader.clone(), item.clone()))
            })
            .collect())
    }

    async fn record_emails_sent(&self, ids: &[UploaderId]) -> StoreResult<()> {
        for id in ids {
            if let Some(mut uploader) = self.uploaders.get_mut(id) {
                uploader.emails_sent_count += 1;
            }
        }
        Ok(())
    }
}
