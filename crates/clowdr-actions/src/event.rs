//! Hasura event trigger payloads

use chrono::{DateTime, Utc};
use clowdr_core::{EmailId, UserId};
use serde::{Deserialize, Serialize};

/// Name of the trigger fired when an email row is inserted
pub const EMAIL_CREATED_TRIGGER: &str = "EmailCreated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData<T> {
    pub old: Option<T>,
    pub new: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    pub op: String,
    pub data: EventData<T>,
    #[serde(default)]
    pub session_variables: Option<serde_json::Value>,
}

/// Envelope Hasura posts for every event trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload<T = serde_json::Value> {
    pub event: Event<T>,
    pub created_at: String,
    pub id: String,
    pub trigger: Trigger,
    pub table: Table,
}

impl Payload<serde_json::Value> {
    /// Reinterpret the row data as `T`
    pub fn typed<T: for<'de> Deserialize<'de>>(&self) -> Option<Payload<T>> {
        let parse = |row: &Option<serde_json::Value>| -> Option<Option<T>> {
            match row {
                None | Some(serde_json::Value::Null) => Some(None),
                Some(value) => serde_json::from_value(value.clone()).ok().map(Some),
            }
        };
        Some(Payload {
            event: Event {
                op: self.event.op.clone(),
                data: EventData {
                    old: parse(&self.event.data.old)?,
                    new: parse(&self.event.data.new)?,
                },
                session_variables: self.event.session_variables.clone(),
            },
            created_at: self.created_at.clone(),
            id: self.id.clone(),
            trigger: self.trigger.clone(),
            table: self.table.clone(),
        })
    }
}

/// An `Email` row as delivered by the trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailData {
    pub id: EmailId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub email_address: String,
    pub reason: String,
    pub subject: String,
    pub html_contents: String,
    pub plain_text_contents: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}
