//! Optimistic-send bookkeeping: temporary ids for locally-created entries
//! and the set of sends still waiting for their server echo.

use std::collections::HashSet;

use chrono::Utc;
use shared::{
    domain::{MessageType, UserId},
    protocol::{temp_message_id, wire_timestamp, Agreement, ChatMessage, ItemSnapshot},
};

/// User-supplied parts of an outbound message, before the tracker stamps an
/// id and timestamp on it.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub content: String,
    pub message_type: MessageType,
    pub image_url: Option<String>,
    pub form_data: Option<String>,
    pub item: Option<ItemSnapshot>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            image_url: None,
            form_data: None,
            item: None,
        }
    }

    pub fn image(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            content: filename.into(),
            message_type: MessageType::Image,
            image_url: Some(url.into()),
            form_data: None,
            item: None,
        }
    }

    pub fn form(agreement: &Agreement) -> Result<Self, serde_json::Error> {
        Ok(Self {
            content: format!("Borrowing agreement: {}", agreement.item_name),
            message_type: MessageType::Form,
            image_url: None,
            form_data: Some(serde_json::to_string(agreement)?),
            item: None,
        })
    }

    pub fn with_item(mut self, item: ItemSnapshot) -> Self {
        self.item = Some(item);
        self
    }
}

/// Tracks optimistic entries between local append and server echo.
///
/// Reconciliation itself is content-based and lives in the store; this type
/// only owns id synthesis and the outstanding set. No timeout is applied to
/// an entry that never receives an echo; it stays pending.
#[derive(Debug, Default)]
pub struct OptimisticSendTracker {
    pending: HashSet<String>,
}

impl OptimisticSendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a draft into an optimistic message with a temporary id
    /// and the current UTC timestamp, and start tracking it.
    pub fn begin(&mut self, sender_id: &UserId, receiver_id: &UserId, draft: MessageDraft) -> ChatMessage {
        let message = ChatMessage {
            id: temp_message_id(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            message_type: draft.message_type,
            content: draft.content,
            timestamp: wire_timestamp(Utc::now()),
            image_url: draft.image_url,
            form_data: draft.form_data,
            item: draft.item,
        };
        self.pending.insert(message.id.clone());
        message
    }

    /// The echo arrived and the store reconciled the entry away.
    pub fn confirm(&mut self, temp_id: &str) -> bool {
        self.pending.remove(temp_id)
    }

    /// The publish failed before the message ever left; stop tracking.
    pub fn abandon(&mut self, temp_id: &str) -> bool {
        self.pending.remove(temp_id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
#[path = "tests/outbox_tests.rs"]
mod tests;
