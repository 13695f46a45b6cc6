//! Records the actions service reads from and writes to the data layer

use chrono::{DateTime, Utc};
use clowdr_core::{
    AttendeeId, ChatId, ConferenceId, ContentGroupId, EmailId, InvitationId, MeetingRecordId,
    RequiredItemId, RoomId, UploaderId, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default capacity of a content group breakout room
pub const BREAKOUT_ROOM_CAPACITY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomMode {
    Breakout,
    Prerecorded,
    Presentation,
    QAndA,
    VideoChat,
    Zoom,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomPrivacy {
    Public,
    Private,
    Dm,
    Managed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub conference_id: ConferenceId,
    pub name: String,
    pub capacity: Option<u32>,
    pub chat_id: Option<ChatId>,
    #[serde(rename = "currentModeName")]
    pub mode: RoomMode,
    #[serde(rename = "roomPrivacyName")]
    pub privacy: RoomPrivacy,
    pub originating_content_group_id: Option<ContentGroupId>,
    pub originating_event_id: Option<Uuid>,
    pub public_vonage_session_id: Option<String>,
}

/// Fields of a room to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub conference_id: ConferenceId,
    pub name: String,
    pub capacity: u32,
    pub chat_id: Option<ChatId>,
    #[serde(rename = "currentModeName")]
    pub mode: RoomMode,
    #[serde(rename = "roomPrivacyName")]
    pub privacy: RoomPrivacy,
    pub originating_content_group_id: Option<ContentGroupId>,
}

/// A content group with its rooms that were not created for an event,
/// oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentGroup {
    pub id: ContentGroupId,
    pub conference_id: ConferenceId,
    pub title: String,
    pub chat_id: Option<ChatId>,
    pub rooms: Vec<RoomId>,
}

/// Room located through a provider session or meeting id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
    pub conference_id: ConferenceId,
}

/// Stored mapping from a room to its Chime meeting
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRecord {
    pub id: MeetingRecordId,
    pub room_id: RoomId,
    pub conference_id: ConferenceId,
    pub chime_meeting_id: String,
    /// Raw provider payload; validated on every read
    pub chime_meeting_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMeetingRecord {
    pub room_id: RoomId,
    pub conference_id: ConferenceId,
    pub chime_meeting_id: String,
    pub chime_meeting_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    pub id: ConferenceId,
    pub name: String,
    pub short_name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub id: AttendeeId,
    pub conference_id: ConferenceId,
    pub display_name: String,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: InvitationId,
    pub attendee_id: AttendeeId,
    pub invite_code: Uuid,
    pub invited_email_address: String,
    pub confirmation_code: Option<Uuid>,
    /// User who asked to claim the invitation with a confirmation code
    pub link_to_user_id: Option<UserId>,
    /// Invitation emails queued so far
    pub emails_sent: u32,
}

/// An invitation with the attendee and conference it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationDetails {
    pub invitation: Invitation,
    pub attendee: Attendee,
    pub conference: Conference,
}

/// Why an email was queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailReason {
    Invite,
    ConfirmInvite,
    UploadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: EmailId,
    pub user_id: Option<UserId>,
    pub invitation_id: Option<InvitationId>,
    pub email_address: String,
    pub reason: EmailReason,
    pub subject: String,
    pub html_contents: String,
    pub plain_text_contents: String,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmail {
    pub user_id: Option<UserId>,
    pub invitation_id: Option<InvitationId>,
    pub email_address: String,
    pub reason: EmailReason,
    pub subject: String,
    pub html_contents: String,
    pub plain_text_contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredItem {
    pub id: RequiredItemId,
    pub conference: Conference,
    pub name: String,
    pub content_group_title: String,
    /// Secret embedded in the upload link
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploader {
    pub id: UploaderId,
    pub required_item_id: RequiredItemId,
    pub email: String,
    pub name: String,
    pub emails_sent_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_room_serializes_hasura_columns() {
        let room = NewRoom {
            conference_id: ConferenceId::generate(),
            name: "Paper 12".into(),
            capacity: BREAKOUT_ROOM_CAPACITY,
            chat_id: None,
            mode: RoomMode::Breakout,
            privacy: RoomPrivacy::Public,
            originating_content_group_id: Some(ContentGroupId::generate()),
        };
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["currentModeName"], "BREAKOUT");
        assert_eq!(json["roomPrivacyName"], "PUBLIC");
        assert_eq!(json["capacity"], 50);
        assert!(json.get("originatingContentGroupId").is_some());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(serde_json::to_value(RoomMode::QAndA).unwrap(), "Q_AND_A");
        assert_eq!(serde_json::to_value(EmailReason::ConfirmInvite).unwrap(), "confirm-invite");
    }

    #[test]
    fn test_full_name_trims() {
        let user = User {
            id: UserId::new("u").unwrap(),
            email: None,
            first_name: "Ada".into(),
            last_name: String::new(),
        };
        assert_eq!(user.full_name(), "Ada");
    }
}
