//! Conversation records and change-log entries

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Message direction relative to the business
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the LINE user
    Incoming,
    /// From an agent or bot
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Direction::Incoming),
            "outgoing" => Ok(Direction::Outgoing),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// Category of an update event, derived from which fields changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Only the delivery status changed
    StatusChange,
    /// Message body or type changed
    ContentEdit,
    /// Only the opaque metadata changed
    MetadataChange,
    General,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::StatusChange => "status_change",
            UpdateType::ContentEdit => "content_edit",
            UpdateType::MetadataChange => "metadata_change",
            UpdateType::General => "general",
        }
    }

    /// Classify a change from the names of the fields it touched
    pub fn classify<'a>(changed: impl IntoIterator<Item = &'a str>) -> Self {
        let changed: Vec<&str> = changed.into_iter().collect();
        if changed.iter().any(|f| *f == "content" || *f == "message_type") {
            UpdateType::ContentEdit
        } else if changed == ["status"] {
            UpdateType::StatusChange
        } else if changed == ["metadata"] {
            UpdateType::MetadataChange
        } else {
            UpdateType::General
        }
    }
}

impl FromStr for UpdateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status_change" => Ok(UpdateType::StatusChange),
            "content_edit" => Ok(UpdateType::ContentEdit),
            "metadata_change" => Ok(UpdateType::MetadataChange),
            "general" => Ok(UpdateType::General),
            other => Err(format!("unknown update type '{}'", other)),
        }
    }
}

macro_rules! text_enum_from_sql {
    ($($ty:ty),*) => {
        $(
            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: String| FromSqlError::Other(e.into()))
                }
            }
        )*
    };
}

text_enum_from_sql!(Direction, MessageStatus, UpdateType);

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A chat message row with its version stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub line_user_id: String,
    pub customer_id: Option<i64>,
    pub message_type: String,
    pub content: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub version_updated_at: DateTime<Utc>,
    pub created_version: u64,
}

impl ConversationRecord {
    /// Fields whose change counts as an externally visible update
    pub const CONTENT_FIELDS: [&'static str; 6] = [
        "customer_id",
        "message_type",
        "content",
        "direction",
        "status",
        "metadata",
    ];

    fn content_value(&self, field: &str) -> Value {
        match field {
            "customer_id" => self.customer_id.map(Value::from).unwrap_or(Value::Null),
            "message_type" => Value::from(self.message_type.clone()),
            "content" => Value::from(self.content.clone()),
            "direction" => Value::from(self.direction.as_str()),
            "status" => Value::from(self.status.as_str()),
            "metadata" => self.metadata.clone().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Old/new snapshots of the content fields that differ between two
    /// versions of the same record. Empty when nothing visible changed.
    pub fn diff(&self, new: &ConversationRecord) -> FieldDiff {
        let mut diff = FieldDiff::default();
        for field in Self::CONTENT_FIELDS {
            let before = self.content_value(field);
            let after = new.content_value(field);
            if before != after {
                diff.old_values.insert(field.to_string(), before);
                diff.new_values.insert(field.to_string(), after);
            }
        }
        diff
    }
}

/// Changed fields between two record states
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    pub old_values: Map<String, Value>,
    pub new_values: Map<String, Value>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.new_values.is_empty()
    }

    pub fn update_type(&self) -> UpdateType {
        UpdateType::classify(self.new_values.keys().map(String::as_str))
    }
}

/// Input for creating a conversation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub line_user_id: String,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub content: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    #[serde(default = "default_status")]
    pub status: MessageStatus,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_message_type() -> String {
    "text".to_string()
}

fn default_direction() -> Direction {
    Direction::Incoming
}

fn default_status() -> MessageStatus {
    MessageStatus::Sent
}

impl NewConversation {
    pub fn text(line_user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            line_user_id: line_user_id.into(),
            customer_id: None,
            message_type: default_message_type(),
            content: content.into(),
            direction: default_direction(),
            status: default_status(),
            metadata: None,
        }
    }
}

/// Partial update of a conversation row; `None` leaves a field untouched.
///
/// `customer_id` is nullable, so it takes two levels: absent leaves it alone,
/// `null` unlinks the customer, a number links one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPatch {
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub customer_id: Option<Option<i64>>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

// A present key becomes Some, even when its value is null
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ConversationPatch {
    /// The record with this patch applied. Version fields are left alone.
    pub fn apply(&self, record: &ConversationRecord) -> ConversationRecord {
        let mut next = record.clone();
        if let Some(customer_id) = self.customer_id {
            next.customer_id = customer_id;
        }
        if let Some(ref message_type) = self.message_type {
            next.message_type = message_type.clone();
        }
        if let Some(ref content) = self.content {
            next.content = content.clone();
        }
        if let Some(direction) = self.direction {
            next.direction = direction;
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(ref metadata) = self.metadata {
            next.metadata = Some(metadata.clone());
        }
        next
    }
}

/// One update event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub id: i64,
    pub conversation_id: i64,
    pub scope_key: String,
    pub update_type: UpdateType,
    pub old_values: Value,
    pub new_values: Value,
    pub update_version: u64,
    pub created_at: DateTime<Utc>,
}

/// One delete event (tombstone)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteLogEntry {
    pub id: i64,
    pub conversation_id: i64,
    pub scope_key: String,
    pub created_version: u64,
    pub delete_version: u64,
    pub deleted_at: DateTime<Utc>,
}
