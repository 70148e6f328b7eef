//! Seeds a conversation from the history collaborator.

use shared::{domain::UserId, error::CollaboratorError};
use tracing::info;

use crate::{collaborators::HistoryService, Conversation};

/// Fetch the historical timeline for the conversation's peer pair and merge
/// it through the same append path as live traffic, so history arriving
/// after live messages still interleaves into one correctly ordered
/// timeline. The fetch completes before any merge, so a collaborator
/// failure leaves the store untouched.
pub async fn seed_history(
    history: &dyn HistoryService,
    self_id: &UserId,
    conversation: &Conversation,
) -> Result<usize, CollaboratorError> {
    let messages = history
        .load_history(self_id, conversation.peer_id())
        .await?;
    let count = messages.len();
    for message in messages {
        conversation.append(message).await;
    }
    info!(peer_id = %conversation.peer_id(), count, "seeded conversation history");
    Ok(count)
}
