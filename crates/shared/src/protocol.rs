use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AgreementId, AgreementStatus, MessageType, UserId};

/// Prefix reserved for client-generated ids of optimistic messages. The
/// server assigns durable ids, so a message still carrying this prefix has
/// not been confirmed yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Shared destination all outbound chat messages are published to.
pub const CHAT_SEND_DESTINATION: &str = "/app/chat";

/// Per-user inbox destination the server delivers message envelopes on.
pub fn inbox_destination(user_id: &UserId) -> String {
    format!("/user/{}/queue/messages", user_id.0)
}

pub fn temp_message_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

/// Wire form of a timestamp. Always zoned; peers that strip the zone are
/// still interpreted as UTC on ingestion.
pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One timeline entry as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message_type: MessageType,
    pub content: String,
    /// Raw ISO-8601-like string. May omit the zone suffix.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// JSON-encoded [`Agreement`] snapshot, present only for FORM messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemSnapshot>,
}

impl ChatMessage {
    pub fn has_temp_id(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

/// Denormalized marketplace item attached at send time for context display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_day: Option<f64>,
}

/// A borrowing agreement as carried inside FORM message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub id: AgreementId,
    pub lender_id: UserId,
    pub borrower_id: UserId,
    pub item_name: String,
    pub borrowing_start: String,
    pub borrowing_end: String,
    pub terms: String,
    pub status: AgreementStatus,
}

/// Payload for the create-agreement collaborator. The server assigns the id
/// and the initial PENDING status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgreement {
    pub lender_id: UserId,
    pub borrower_id: UserId,
    pub item_name: String,
    pub borrowing_start: String,
    pub borrowing_end: String,
    pub terms: String,
}

/// Envelope exchanged with the chat server over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    Subscribe { destination: String },
    Unsubscribe { destination: String },
    Send { destination: String, body: serde_json::Value },
    Message { destination: String, body: serde_json::Value },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
