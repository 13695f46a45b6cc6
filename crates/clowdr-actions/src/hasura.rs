//! Hasura GraphQL data layer
//!
//! Every store operation is one GraphQL document posted to `HASURA_URL`
//! with the admin secret. Constraint violations come back as
//! [`StoreError::Conflict`] so callers can treat them as lost races.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clowdr_core::{
    AttendeeId, ChatId, ConferenceId, ContentGroupId, EmailId, InvitationId, MeetingRecordId,
    RequiredItemId, RoomId, StoreError, UploaderId, UserId,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HasuraConfig;
use crate::model::{
    Attendee, Conference, ContentGroup, Invitation, InvitationDetails, MeetingRecord, NewEmail,
    NewMeetingRecord, NewRoom, RequiredItem, Room, RoomRef, Uploader, User,
};
use crate::store::{EmailStore, InvitationStore, RoomStore, StoreResult, UploaderStore};

const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(default)]
    extensions: Option<Value>,
}

impl GraphQlError {
    fn into_store_error(self) -> StoreError {
        let code = self
            .extensions
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        match code {
            "constraint-violation" => StoreError::Conflict(self.message),
            "not-found" => StoreError::NotFound(self.message),
            _ => StoreError::Backend(self.message),
        }
    }
}

pub struct HasuraClient {
    client: reqwest::Client,
    config: HasuraConfig,
}

impl HasuraClient {
    pub fn new(config: HasuraConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn request<T: DeserializeOwned>(&self, document: &str, variables: Value) -> StoreResult<T> {
        let response = self
            .client
            .post(&self.config.url)
            .header(ADMIN_SECRET_HEADER, &self.config.admin_secret)
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        unwrap_response(body)
    }
}

fn unwrap_response<T>(mut body: GraphQlResponse<T>) -> StoreResult<T> {
    if !body.errors.is_empty() {
        let first = body.errors.remove(0);
        warn!(error = %first.message, "GraphQL request failed");
        return Err(first.into_store_error());
    }
    body.data
        .ok_or_else(|| StoreError::Backend("GraphQL response without data".into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdRow<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRefRow {
    id: RoomId,
    conference_id: ConferenceId,
}

impl From<RoomRefRow> for RoomRef {
    fn from(row: RoomRefRow) -> Self {
        RoomRef {
            room_id: row.id,
            conference_id: row.conference_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentGroupRow {
    id: ContentGroupId,
    chat_id: Option<ChatId>,
    conference_id: ConferenceId,
    rooms: Vec<IdRow<RoomId>>,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingRow {
    id: MeetingRecordId,
    room_id: RoomId,
    conference_id: ConferenceId,
    chime_meeting_id: String,
    chime_meeting_data: Value,
}

#[derive(Debug, Deserialize)]
struct Aggregate {
    aggregate: Count,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendeeRow {
    id: AttendeeId,
    conference_id: ConferenceId,
    display_name: String,
    user_id: Option<UserId>,
    conference: Conference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitationRow {
    id: InvitationId,
    attendee_id: AttendeeId,
    invite_code: Uuid,
    invited_email_address: String,
    confirmation_code: Option<Uuid>,
    link_to_user_id: Option<UserId>,
    #[serde(rename = "emails_aggregate")]
    emails: Aggregate,
    attendee: AttendeeRow,
}

impl From<InvitationRow> for InvitationDetails {
    fn from(row: InvitationRow) -> Self {
        InvitationDetails {
            invitation: Invitation {
                id: row.id,
                attendee_id: row.attendee_id,
                invite_code: row.invite_code,
                invited_email_address: row.invited_email_address,
                confirmation_code: row.confirmation_code,
                link_to_user_id: row.link_to_user_id,
                emails_sent: row.emails.aggregate.count,
            },
            attendee: Attendee {
                id: row.attendee.id,
                conference_id: row.attendee.conference_id,
                display_name: row.attendee.display_name,
                user_id: row.attendee.user_id,
            },
            conference: row.attendee.conference,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleRow {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequiredItemRow {
    id: RequiredItemId,
    name: String,
    access_token: String,
    content_group: TitleRow,
    conference: Conference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploaderRow {
    id: UploaderId,
    email: String,
    name: String,
    emails_sent_count: u32,
    required_content_item: RequiredItemRow,
}

impl From<UploaderRow> for (Uploader, RequiredItem) {
    fn from(row: UploaderRow) -> Self {
        let item = row.required_content_item;
        (
            Uploader {
                id: row.id,
                required_item_id: item.id,
                email: row.email,
                name: row.name,
                emails_sent_count: row.emails_sent_count,
            },
            RequiredItem {
                id: item.id,
                conference: item.conference,
                name: item.name,
                content_group_title: item.content_group.title,
                access_token: item.access_token,
            },
        )
    }
}

const INVITATION_FIELDS: &str = r#"
    id
    attendeeId
    inviteCode
    invitedEmailAddress
    confirmationCode
    linkToUserId
    emails_aggregate { aggregate { count } }
    attendee {
        id
        conferenceId
        displayName
        userId
        conference { id name shortName slug }
    }
"#;

#[async_trait]
impl RoomStore for HasuraClient {
    async fn content_group(&self, id: ContentGroupId) -> StoreResult<Option<ContentGroup>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            ContentGroup_by_pk: Option<ContentGroupRow>,
        }
        let data: Data = self
            .request(
                r#"query CreateContentGroupRoom_GetContentGroup($id: uuid!) {
                    ContentGroup_by_pk(id: $id) {
                        id
                        chatId
                        conferenceId
                        rooms(where: { originatingEventId: { _is_null: true } }, order_by: { created_at: asc }) { id }
                        title
                    }
                }"#,
                json!({ "id": id }),
            )
            .await?;
        Ok(data.ContentGroup_by_pk.map(|row| ContentGroup {
            id: row.id,
            conference_id: row.conference_id,
            title: row.title,
            chat_id: row.chat_id,
            rooms: row.rooms.into_iter().map(|r| r.id).collect(),
        }))
    }

    async fn insert_room(&self, room: NewRoom) -> StoreResult<RoomId> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            insert_Room_one: Option<IdRow<RoomId>>,
        }
        let data: Data = self
            .request(
                r#"mutation ContentGroup_CreateRoom($object: Room_insert_input!) {
                    insert_Room_one(object: $object) { id }
                }"#,
                json!({ "object": room }),
            )
            .await?;
        data.insert_Room_one
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Backend("Room insert returned nothing".into()))
    }

    async fn room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Room_by_pk: Option<Room>,
        }
        let data: Data = self
            .request(
                r#"query GetRoom($roomId: uuid!) {
                    Room_by_pk(id: $roomId) {
                        id
                        conferenceId
                        name
                        capacity
                        chatId
                        currentModeName
                        roomPrivacyName
                        originatingContentGroupId
                        originatingEventId
                        publicVonageSessionId
                    }
                }"#,
                json!({ "roomId": id }),
            )
            .await?;
        Ok(data.Room_by_pk)
    }

    async fn attendee_can_join(
        &self,
        attendee_id: AttendeeId,
        room_id: RoomId,
        conference_id: ConferenceId,
    ) -> StoreResult<bool> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Room: Vec<IdRow<RoomId>>,
            FlatUserPermission: Vec<Value>,
        }
        let data: Data = self
            .request(
                r#"query GetRoomThatAttendeeCanJoin($roomId: uuid, $attendeeId: uuid, $conferenceId: uuid) {
                    Room(
                        where: {
                            id: { _eq: $roomId }
                            conference: { attendees: { id: { _eq: $attendeeId } }, id: { _eq: $conferenceId } }
                            _or: [
                                { roomPeople: { attendee: { id: { _eq: $attendeeId } } } }
                                { roomPrivacyName: { _eq: PUBLIC } }
                            ]
                        }
                    ) { id }
                    FlatUserPermission(
                        where: {
                            user: { attendees: { id: { _eq: $attendeeId } } }
                            conference: { id: { _eq: $conferenceId } }
                            permission_name: { _eq: "CONFERENCE_VIEW_ATTENDEES" }
                        }
                    ) { permission_name }
                }"#,
                json!({ "roomId": room_id, "attendeeId": attendee_id, "conferenceId": conference_id }),
            )
            .await?;
        Ok(!data.FlatUserPermission.is_empty() && !data.Room.is_empty())
    }

    async fn meeting_records(&self, room_id: RoomId) -> StoreResult<Vec<MeetingRecord>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            room_RoomChimeMeeting: Vec<MeetingRow>,
        }
        let data: Data = self
            .request(
                r#"query GetRoomChimeMeeting($roomId: uuid!) {
                    room_RoomChimeMeeting(where: { roomId: { _eq: $roomId } }) {
                        id
                        roomId
                        conferenceId
                        chimeMeetingId
                        chimeMeetingData
                    }
                }"#,
                json!({ "roomId": room_id }),
            )
            .await?;
        Ok(data
            .room_RoomChimeMeeting
            .into_iter()
            .map(|row| MeetingRecord {
                id: row.id,
                room_id: row.room_id,
                conference_id: row.conference_id,
                chime_meeting_id: row.chime_meeting_id,
                chime_meeting_data: row.chime_meeting_data,
            })
            .collect())
    }

    async fn insert_meeting_record(&self, record: NewMeetingRecord) -> StoreResult<MeetingRecordId> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            insert_room_RoomChimeMeeting_one: Option<IdRow<MeetingRecordId>>,
        }
        let data: Data = self
            .request(
                r#"mutation CreateRoomChimeMeeting(
                    $conferenceId: uuid!
                    $chimeMeetingData: jsonb!
                    $chimeMeetingId: String!
                    $roomId: uuid!
                ) {
                    insert_room_RoomChimeMeeting_one(
                        object: {
                            conferenceId: $conferenceId
                            chimeMeetingData: $chimeMeetingData
                            chimeMeetingId: $chimeMeetingId
                            roomId: $roomId
                        }
                    ) { id }
                }"#,
                json!({
                    "conferenceId": record.conference_id,
                    "chimeMeetingData": record.chime_meeting_data,
                    "chimeMeetingId": record.chime_meeting_id,
                    "roomId": record.room_id,
                }),
            )
            .await?;
        data.insert_room_RoomChimeMeeting_one
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Backend("Meeting insert returned nothing".into()))
    }

    async fn delete_meeting_record(&self, id: MeetingRecordId) -> StoreResult<()> {
        let _: Value = self
            .request(
                r#"mutation DeleteRoomChimeMeeting($roomChimeMeetingId: uuid!) {
                    delete_room_RoomChimeMeeting_by_pk(id: $roomChimeMeetingId) { id }
                }"#,
                json!({ "roomChimeMeetingId": id }),
            )
            .await?;
        debug!(record_id = %id, "Deleted room meeting record");
        Ok(())
    }

    async fn rooms_by_vonage_session(&self, session_id: &str) -> StoreResult<Vec<RoomRef>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Room: Vec<RoomRefRow>,
        }
        let data: Data = self
            .request(
                r#"query GetRoomBySessionId($sessionId: String!) {
                    Room(where: { publicVonageSessionId: { _eq: $sessionId } }) { id conferenceId }
                }"#,
                json!({ "sessionId": session_id }),
            )
            .await?;
        Ok(data.Room.into_iter().map(RoomRef::from).collect())
    }

    async fn rooms_by_chime_meeting(&self, meeting_id: &str) -> StoreResult<Vec<RoomRef>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Room: Vec<RoomRefRow>,
        }
        let data: Data = self
            .request(
                r#"query GetRoomByChimeMeetingId($meetingId: String!) {
                    Room(where: { roomChimeMeeting: { chimeMeetingId: { _eq: $meetingId } } }) { id conferenceId }
                }"#,
                json!({ "meetingId": meeting_id }),
            )
            .await?;
        Ok(data.Room.into_iter().map(RoomRef::from).collect())
    }
}

#[async_trait]
impl InvitationStore for HasuraClient {
    async fn invitations_for_attendees(
        &self,
        attendee_ids: &[AttendeeId],
    ) -> StoreResult<Vec<InvitationDetails>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Invitation: Vec<InvitationRow>,
        }
        let document = format!(
            "query SelectInvitations($attendeeIds: [uuid!]!) {{ Invitation(where: {{ attendeeId: {{ _in: $attendeeIds }} }}) {{ {} }} }}",
            INVITATION_FIELDS
        );
        let data: Data = self
            .request(&document, json!({ "attendeeIds": attendee_ids }))
            .await?;
        Ok(data.Invitation.into_iter().map(InvitationDetails::from).collect())
    }

    async fn invitation_by_code(&self, invite_code: Uuid) -> StoreResult<Option<InvitationDetails>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Invitation: Vec<InvitationRow>,
        }
        let document = format!(
            "query SelectInvitationByCode($inviteCode: uuid!) {{ Invitation(where: {{ inviteCode: {{ _eq: $inviteCode }} }}) {{ {} }} }}",
            INVITATION_FIELDS
        );
        let data: Data = self
            .request(&document, json!({ "inviteCode": invite_code }))
            .await?;
        Ok(data.Invitation.into_iter().next().map(InvitationDetails::from))
    }

    async fn set_confirmation(
        &self,
        invitation_id: InvitationId,
        confirmation_code: Uuid,
        link_to_user_id: UserId,
    ) -> StoreResult<()> {
        let _: Value = self
            .request(
                r#"mutation SetInvitationConfirmationCode($id: uuid!, $code: uuid!, $userId: String!) {
                    update_Invitation_by_pk(
                        pk_columns: { id: $id }
                        _set: { confirmationCode: $code, linkToUserId: $userId }
                    ) { id }
                }"#,
                json!({ "id": invitation_id, "code": confirmation_code, "userId": link_to_user_id }),
            )
            .await?;
        Ok(())
    }

    async fn link_attendee(&self, attendee_id: AttendeeId, user_id: UserId) -> StoreResult<()> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            update_Attendee: Affected,
        }
        #[derive(Deserialize)]
        struct Affected {
            affected_rows: u32,
        }
        let data: Data = self
            .request(
                r#"mutation LinkAttendeeToUser($attendeeId: uuid!, $userId: String!) {
                    update_Attendee(
                        where: {
                            id: { _eq: $attendeeId }
                            _or: [{ userId: { _is_null: true } }, { userId: { _eq: $userId } }]
                        }
                        _set: { userId: $userId }
                    ) { affected_rows }
                }"#,
                json!({ "attendeeId": attendee_id, "userId": user_id }),
            )
            .await?;
        if data.update_Attendee.affected_rows == 0 {
            return Err(StoreError::Conflict(format!(
                "attendee {} missing or already linked",
                attendee_id
            )));
        }
        Ok(())
    }

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            User_by_pk: Option<User>,
        }
        let data: Data = self
            .request(
                r#"query GetUser($userId: String!) {
                    User_by_pk(id: $userId) { id email firstName lastName }
                }"#,
                json!({ "userId": id }),
            )
            .await?;
        Ok(data.User_by_pk)
    }
}

#[async_trait]
impl EmailStore for HasuraClient {
    async fn insert_emails(&self, emails: Vec<NewEmail>) -> StoreResult<Vec<EmailId>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            insert_Email: Returning,
        }
        #[derive(Deserialize)]
        struct Returning {
            returning: Vec<IdRow<EmailId>>,
        }
        let data: Data = self
            .request(
                r#"mutation InsertEmails($objects: [Email_insert_input!]!) {
                    insert_Email(objects: $objects) { returning { id } }
                }"#,
                json!({ "objects": emails }),
            )
            .await?;
        Ok(data.insert_Email.returning.into_iter().map(|r| r.id).collect())
    }

    async fn mark_sent(&self, id: EmailId, sent_at: DateTime<Utc>) -> StoreResult<()> {
        let _: Value = self
            .request(
                r#"mutation MarkEmailSent($id: uuid!, $sentAt: timestamptz!) {
                    update_Email_by_pk(pk_columns: { id: $id }, _set: { sentAt: $sentAt }) { id }
                }"#,
                json!({ "id": id, "sentAt": sent_at }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UploaderStore for HasuraClient {
    async fn uploaders(&self, ids: &[UploaderId]) -> StoreResult<Vec<(Uploader, RequiredItem)>> {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Data {
            Uploader: Vec<UploaderRow>,
        }
        let data: Data = self
            .request(
                r#"query SelectUploaders($uploaderIds: [uuid!]!) {
                    Uploader(where: { id: { _in: $uploaderIds } }) {
                        id
                        email
                        name
                        emailsSentCount
                        requiredContentItem {
                            id
                            name
                            accessToken
                            contentGroup { title }
                            conference { id name shortName slug }
                        }
                    }
                }"#,
                json!({ "uploaderIds": ids }),
            )
            .await?;
        Ok(data.Uploader.into_iter().map(Into::into).collect())
    }

    async fn record_emails_sent(&self, ids: &[UploaderId]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: Value = self
            .request(
                r#"mutation IncrementUploaderEmails($uploaderIds: [uuid!]!) {
                    update_Uploader(where: { id: { _in: $uploaderIds } }, _inc: { emailsSentCount: 1 }) {
                        affected_rows
                    }
                }"#,
                json!({ "uploaderIds": ids }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_violation_is_conflict() {
        let body: GraphQlResponse<Value> = serde_json::from_value(json!({
            "errors": [{
                "message": "Uniqueness violation",
                "extensions": { "code": "constraint-violation", "path": "$.selectionSet" }
            }]
        }))
        .unwrap();
        assert!(matches!(unwrap_response(body), Err(StoreError::Conflict(_))));

        let body: GraphQlResponse<Value> =
            serde_json::from_value(json!({ "errors": [{ "message": "boom" }] })).unwrap();
        assert!(matches!(unwrap_response(body), Err(StoreError::Backend(_))));

        let body: GraphQlResponse<Value> = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(unwrap_response(body), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_invitation_row_conversion() {
        let attendee = AttendeeId::generate();
        let conference = ConferenceId::generate();
        let row: InvitationRow = serde_json::from_value(json!({
            "id": InvitationId::generate(),
            "attendeeId": attendee,
            "inviteCode": Uuid::new_v4(),
            "invitedEmailAddress": "ada@example.org",
            "confirmationCode": null,
            "linkToUserId": null,
            "emails_aggregate": { "aggregate": { "count": 2 } },
            "attendee": {
                "id": attendee,
                "conferenceId": conference,
                "displayName": "Ada",
                "userId": "auth0|ada",
                "conference": { "id": conference, "name": "CoT", "shortName": "CoT", "slug": "cot" }
            }
        }))
        .unwrap();
        let details = InvitationDetails::from(row);
        assert_eq!(details.invitation.emails_sent, 2);
        assert_eq!(details.attendee.user_id.unwrap().as_str(), "auth0|ada");
        assert_eq!(details.conference.slug, "cot");
    }

    #[test]
    fn test_room_row_parses() {
        let room: Room = serde_json::from_value(json!({
            "id": RoomId::generate(),
            "conferenceId": ConferenceId::generate(),
            "name": "Lobby",
            "capacity": null,
            "chatId": null,
            "currentModeName": "VIDEO_CHAT",
            "roomPrivacyName": "PUBLIC",
            "originatingContentGroupId": null,
            "originatingEventId": null,
            "publicVonageSessionId": "1_MX4"
        }))
        .unwrap();
        assert_eq!(room.public_vonage_session_id.as_deref(), Some("1_MX4"));
    }
}
