//! Typed identifiers
//!
//! Hasura rows are keyed by UUIDs; each entity gets its own newtype so a
//! room id can never be passed where a conference id is expected. User ids
//! come from the identity provider (e.g. `auth0|5f...`) and are opaque strings.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Wrap an existing UUID
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Short display form (first 8 hex chars)
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| IdError::InvalidFormat {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a video/chat room
    RoomId,
    "room"
);
uuid_id!(
    /// Identifier of a conference
    ConferenceId,
    "conference"
);
uuid_id!(
    /// Identifier of a chat thread
    ChatId,
    "chat"
);
uuid_id!(
    /// Identifier of a conference registrant (attendee profile)
    RegistrantId,
    "registrant"
);
uuid_id!(
    /// Identifier of an attendee row
    AttendeeId,
    "attendee"
);
uuid_id!(
    /// Identifier of a content group (paper, session, sponsor...)
    ContentGroupId,
    "content group"
);
uuid_id!(
    /// Identifier of a live participant connection in a room
    ParticipantId,
    "participant"
);
uuid_id!(
    /// Identifier of a persisted room meeting record
    MeetingRecordId,
    "meeting record"
);
uuid_id!(
    /// Identifier of an invitation
    InvitationId,
    "invitation"
);
uuid_id!(
    /// Identifier of a queued email
    EmailId,
    "email"
);
uuid_id!(
    /// Identifier of a content item requiring uploads
    RequiredItemId,
    "required item"
);
uuid_id!(
    /// Identifier of a person asked to upload content
    UploaderId,
    "uploader"
);

/// Identifier of an authenticated user, as issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting empty values
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::Empty("user"));
        }
        Ok(Self(id))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
