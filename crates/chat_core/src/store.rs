//! Canonical ordered, deduplicated message list for one conversation.

use serde_json::Value;
use shared::{
    domain::{AgreementId, AgreementStatus, MessageType, UserId},
    protocol::{Agreement, ChatMessage},
};
use tracing::warn;

use crate::ordering::SortKey;

/// A message plus everything derived from it at ingestion time: the ordering
/// key and, for FORM messages, the decoded agreement. Decoding happens once
/// here instead of on every read of `form_data`.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message: ChatMessage,
    pub agreement: Option<Agreement>,
    sort_key: SortKey,
}

impl StoredMessage {
    fn ingest(message: ChatMessage) -> Self {
        let agreement = decode_agreement(&message);
        let sort_key = SortKey::of(&message);
        Self {
            message,
            agreement,
            sort_key,
        }
    }
}

fn decode_agreement(message: &ChatMessage) -> Option<Agreement> {
    if message.message_type != MessageType::Form {
        return None;
    }
    let raw = message.form_data.as_deref()?;
    match serde_json::from_str(raw) {
        Ok(agreement) => Some(agreement),
        Err(err) => {
            // Contained per-message failure: the entry stays visible in the
            // timeline, it just cannot take part in agreement workflows.
            warn!(message_id = %message.id, "unparseable agreement payload: {err}");
            None
        }
    }
}

/// What `append` did with the incoming message, so callers can settle their
/// optimistic-send bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Temporary id of the optimistic entry this message superseded.
    pub reconciled_temp_id: Option<String>,
    /// The message id was already present; the entry was refreshed in place.
    pub deduplicated: bool,
}

/// The lender/borrower context needed to authorize a response to an
/// agreement, taken from its most recent copy in the store.
#[derive(Debug, Clone)]
pub struct AgreementContext {
    pub agreement: Agreement,
    pub message_sender: UserId,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<StoredMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one message into the timeline.
    ///
    /// Appending an id that is already present refreshes that entry instead
    /// of creating a second visible copy. A durable message additionally
    /// runs the reconciliation pass: an optimistic entry with the same
    /// `(content, message_type)` is removed, superseded by its echo. The
    /// list is re-sorted afterwards; the sort is stable, so equal keys keep
    /// their insertion order.
    pub fn append(&mut self, incoming: ChatMessage) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        if let Some(pos) = self
            .entries
            .iter()
            .position(|entry| entry.message.id == incoming.id)
        {
            self.entries[pos] = StoredMessage::ingest(incoming);
            self.resort();
            outcome.deduplicated = true;
            return outcome;
        }

        if !incoming.has_temp_id() {
            if let Some(pos) = self.entries.iter().position(|entry| {
                entry.message.has_temp_id()
                    && entry.message.content == incoming.content
                    && entry.message.message_type == incoming.message_type
            }) {
                outcome.reconciled_temp_id = Some(self.entries.remove(pos).message.id);
            }
        }

        self.entries.push(StoredMessage::ingest(incoming));
        self.resort();
        outcome
    }

    /// Drop an entry by id. Used to roll an optimistic send back out when
    /// its publish failed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.message.id != id);
        self.entries.len() != before
    }

    /// Rewrite the status of every copy of the given agreement, both in the
    /// cached decode and in the serialized `form_data`. Returns how many
    /// entries were patched.
    pub fn patch_agreement_status(
        &mut self,
        agreement_id: AgreementId,
        status: AgreementStatus,
    ) -> usize {
        let mut patched = 0;
        for entry in &mut self.entries {
            let Some(agreement) = entry.agreement.as_mut() else {
                continue;
            };
            if agreement.id != agreement_id {
                continue;
            }
            agreement.status = status;
            if let Ok(raw) = serde_json::to_string(agreement) {
                entry.message.form_data = Some(raw);
            }
            patched += 1;
        }
        patched
    }

    /// Most recent copy of an agreement together with the sender of the
    /// message that carried it.
    pub fn agreement_context(&self, agreement_id: AgreementId) -> Option<AgreementContext> {
        self.entries
            .iter()
            .rev()
            .find_map(|entry| match &entry.agreement {
                Some(agreement) if agreement.id == agreement_id => Some(AgreementContext {
                    agreement: agreement.clone(),
                    message_sender: entry.message.sender_id.clone(),
                }),
                _ => None,
            })
    }

    pub fn entries(&self) -> &[StoredMessage] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn resort(&mut self) {
        self.entries.sort_by_key(|entry| entry.sort_key);
    }
}

/// Best-effort parse of an inbound envelope body. Returns None (after
/// logging) instead of propagating, so one malformed payload never aborts
/// processing of the rest of the stream.
pub fn parse_inbound(body: Value) -> Option<ChatMessage> {
    match serde_json::from_value(body) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!("ignoring malformed inbound message envelope: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
