//! Message synchronization engine for peer-to-peer conversations over a
//! publish/subscribe chat transport.
//!
//! A [`ConversationClient`] owns one [`connection::ConnectionManager`],
//! subscribes the user's inbox destination once, and routes inbound message
//! envelopes to the per-peer [`Conversation`] views it currently has open.
//! Each conversation holds the canonical ordered timeline
//! ([`store::MessageStore`]) plus the optimistic-send bookkeeping
//! ([`outbox::OptimisticSendTracker`]); the agreement workflow
//! ([`agreement::AgreementStateMachine`]) rides on the same stream.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use shared::{
    domain::{AgreementDecision, AgreementId, AgreementStatus, UserId},
    protocol::{Agreement, ChatMessage, ItemSnapshot, NewAgreement, CHAT_SEND_DESTINATION},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub mod agreement;
pub mod collaborators;
pub mod connection;
pub mod loader;
pub mod ordering;
pub mod outbox;
pub mod store;

use agreement::AgreementStateMachine;
use collaborators::{
    AgreementService, HistoryService, ImageStore, MissingAgreementService, MissingHistoryService,
    MissingImageStore,
};
use connection::{ConnectionManager, InboundHandler, SubscriptionHandle};
use outbox::{MessageDraft, OptimisticSendTracker};
use store::{AgreementContext, AppendOutcome, MessageStore, StoredMessage};

/// One open peer thread: the ordered timeline plus pending optimistic sends.
/// All mutation goes through `append`, which consults the ordering policy
/// and the reconciliation rule; consumers read snapshots.
#[derive(Debug)]
pub struct Conversation {
    peer_id: UserId,
    store: Mutex<MessageStore>,
    outbox: Mutex<OptimisticSendTracker>,
}

impl Conversation {
    pub(crate) fn new(peer_id: UserId) -> Self {
        Self {
            peer_id,
            store: Mutex::new(MessageStore::new()),
            outbox: Mutex::new(OptimisticSendTracker::new()),
        }
    }

    pub fn peer_id(&self) -> &UserId {
        &self.peer_id
    }

    /// Timeline snapshot in canonical order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.store.lock().await.messages()
    }

    pub async fn entries(&self) -> Vec<StoredMessage> {
        self.store.lock().await.entries().to_vec()
    }

    /// Optimistic sends still waiting for a server echo.
    pub async fn pending_sends(&self) -> usize {
        self.outbox.lock().await.pending_count()
    }

    pub(crate) async fn append(&self, message: ChatMessage) -> AppendOutcome {
        let outcome = self.store.lock().await.append(message);
        if let Some(temp_id) = &outcome.reconciled_temp_id {
            self.outbox.lock().await.confirm(temp_id);
        }
        outcome
    }

    pub(crate) async fn begin_optimistic(
        &self,
        sender_id: &UserId,
        draft: MessageDraft,
    ) -> ChatMessage {
        let message = self
            .outbox
            .lock()
            .await
            .begin(sender_id, &self.peer_id, draft);
        self.store.lock().await.append(message.clone());
        message
    }

    pub(crate) async fn abandon_optimistic(&self, temp_id: &str) {
        self.outbox.lock().await.abandon(temp_id);
        self.store.lock().await.remove(temp_id);
    }

    pub(crate) async fn agreement_context(
        &self,
        agreement_id: AgreementId,
    ) -> Option<AgreementContext> {
        self.store.lock().await.agreement_context(agreement_id)
    }

    /// In-place status patch across every copy of the agreement, so all
    /// historical renderings stay consistent.
    pub async fn patch_agreement(&self, agreement_id: AgreementId, status: AgreementStatus) -> usize {
        self.store
            .lock()
            .await
            .patch_agreement_status(agreement_id, status)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    MessageReceived { peer_id: UserId, message: ChatMessage },
    TimelineUpdated { peer_id: UserId },
    AgreementUpdated { peer_id: UserId, agreement: Agreement },
    Error(String),
}

pub struct ConversationClient {
    self_id: UserId,
    connection: ConnectionManager,
    history: Arc<dyn HistoryService>,
    images: Arc<dyn ImageStore>,
    agreements: AgreementStateMachine,
    conversations: Mutex<HashMap<UserId, Arc<Conversation>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConversationClient {
    pub fn new(self_id: UserId, connection: ConnectionManager) -> Arc<Self> {
        Self::new_with_collaborators(
            self_id,
            connection,
            Arc::new(MissingHistoryService),
            Arc::new(MissingImageStore),
            Arc::new(MissingAgreementService),
        )
    }

    pub fn new_with_collaborators(
        self_id: UserId,
        connection: ConnectionManager,
        history: Arc<dyn HistoryService>,
        images: Arc<dyn ImageStore>,
        agreements: Arc<dyn AgreementService>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            self_id,
            connection,
            history,
            images,
            agreements: AgreementStateMachine::new(agreements),
            conversations: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
            events,
        })
    }

    pub fn self_id(&self) -> &UserId {
        &self.self_id
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connect the transport and register the inbox handler. The handler
    /// holds only a weak reference back to the client, so dropping the
    /// client tears the routing down.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.connection.connect().await?;

        let weak = Arc::downgrade(self);
        let handler: InboundHandler = Arc::new(move |body| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(client) = weak.upgrade() {
                    client.deliver_inbound(body).await;
                }
            })
        });
        let handle = self.connection.subscribe(&self.self_id, handler).await?;
        *self.subscription.lock().await = Some(handle);
        info!(self_id = %self.self_id, "conversation client started");
        Ok(())
    }

    /// Release the inbox subscription and close the transport. Open
    /// conversation views stop receiving mutations immediately.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.subscription.lock().await.take() {
            handle.unsubscribe().await;
        }
        self.connection.close().await;
        self.conversations.lock().await.clear();
    }

    /// Open (or return the already-open) conversation with a peer. The view
    /// is registered for live routing first and then seeded from history, so
    /// live traffic racing the fetch still interleaves correctly.
    pub async fn open_conversation(self: &Arc<Self>, peer_id: UserId) -> Result<Arc<Conversation>> {
        if let Some(existing) = self.conversations.lock().await.get(&peer_id).cloned() {
            return Ok(existing);
        }

        let conversation = Arc::new(Conversation::new(peer_id.clone()));
        self.conversations
            .lock()
            .await
            .insert(peer_id.clone(), Arc::clone(&conversation));

        if let Err(err) =
            loader::seed_history(&*self.history, &self.self_id, &conversation).await
        {
            self.conversations.lock().await.remove(&peer_id);
            return Err(err.into());
        }

        let _ = self.events.send(ClientEvent::TimelineUpdated {
            peer_id: peer_id.clone(),
        });
        Ok(conversation)
    }

    /// Drop a conversation view; inbound traffic for this peer is discarded
    /// until it is opened again.
    pub async fn close_conversation(&self, peer_id: &UserId) {
        self.conversations.lock().await.remove(peer_id);
    }

    pub async fn conversation(&self, peer_id: &UserId) -> Option<Arc<Conversation>> {
        self.conversations.lock().await.get(peer_id).cloned()
    }

    pub async fn send_text(&self, peer_id: &UserId, content: &str) -> Result<ChatMessage> {
        let conversation = self.open_required(peer_id).await?;
        self.send_draft(&conversation, MessageDraft::text(content))
            .await
    }

    pub async fn send_text_about_item(
        &self,
        peer_id: &UserId,
        content: &str,
        item: ItemSnapshot,
    ) -> Result<ChatMessage> {
        let conversation = self.open_required(peer_id).await?;
        self.send_draft(&conversation, MessageDraft::text(content).with_item(item))
            .await
    }

    /// Upload the image payload first, then send an IMAGE message carrying
    /// the returned URL. An upload failure surfaces before the timeline is
    /// touched.
    pub async fn send_image(
        &self,
        peer_id: &UserId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ChatMessage> {
        let conversation = self.open_required(peer_id).await?;
        let url = self.images.upload(filename, bytes).await?;
        self.send_draft(&conversation, MessageDraft::image(filename, url))
            .await
    }

    /// Create an agreement through the collaborator and send the initial
    /// FORM message carrying it.
    pub async fn propose_agreement(
        &self,
        peer_id: &UserId,
        request: NewAgreement,
    ) -> Result<Agreement> {
        let conversation = self.open_required(peer_id).await?;
        let created = self.agreements.propose(&request).await?;
        let draft = MessageDraft::form(&created)?;
        self.send_draft(&conversation, draft).await?;
        Ok(created)
    }

    /// Resolve a pending agreement: guards, collaborator call, re-publish of
    /// the updated FORM message, then an in-place patch of every copy in the
    /// store so all subscribers and all historical renderings converge.
    pub async fn respond_to_agreement(
        &self,
        peer_id: &UserId,
        agreement_id: AgreementId,
        decision: AgreementDecision,
    ) -> Result<Agreement> {
        let conversation = self.open_required(peer_id).await?;
        let updated = self
            .agreements
            .respond(&self.self_id, &conversation, agreement_id, decision)
            .await?;

        let draft = MessageDraft::form(&updated)?;
        self.send_draft(&conversation, draft).await?;

        let patched = conversation
            .patch_agreement(agreement_id, updated.status)
            .await;
        debug!(agreement_id = agreement_id.0, patched, "agreement copies patched");

        let _ = self.events.send(ClientEvent::AgreementUpdated {
            peer_id: peer_id.clone(),
            agreement: updated.clone(),
        });
        Ok(updated)
    }

    async fn open_required(&self, peer_id: &UserId) -> Result<Arc<Conversation>> {
        self.conversation(peer_id)
            .await
            .ok_or_else(|| anyhow!("no open conversation with {peer_id}"))
    }

    /// Optimistic send: the entry is visible locally before the publish, and
    /// rolled back out if the publish fails synchronously.
    async fn send_draft(
        &self,
        conversation: &Arc<Conversation>,
        draft: MessageDraft,
    ) -> Result<ChatMessage> {
        let message = conversation.begin_optimistic(&self.self_id, draft).await;
        let _ = self.events.send(ClientEvent::TimelineUpdated {
            peer_id: conversation.peer_id().clone(),
        });

        if let Err(err) = self.connection.publish(CHAT_SEND_DESTINATION, &message).await {
            conversation.abandon_optimistic(&message.id).await;
            let _ = self.events.send(ClientEvent::TimelineUpdated {
                peer_id: conversation.peer_id().clone(),
            });
            let _ = self.events.send(ClientEvent::Error(err.to_string()));
            return Err(err.into());
        }
        Ok(message)
    }

    async fn deliver_inbound(&self, body: serde_json::Value) {
        let Some(message) = store::parse_inbound(body) else {
            return;
        };

        let peer_id = if message.sender_id == self.self_id {
            message.receiver_id.clone()
        } else {
            message.sender_id.clone()
        };

        let Some(conversation) = self.conversation(&peer_id).await else {
            debug!(%peer_id, "dropping inbound message for a conversation that is not open");
            return;
        };

        let outcome = conversation.append(message.clone()).await;
        if let Some(temp_id) = &outcome.reconciled_temp_id {
            debug!(%temp_id, id = %message.id, "optimistic send confirmed by echo");
        }

        let _ = self.events.send(ClientEvent::MessageReceived {
            peer_id: peer_id.clone(),
            message,
        });
        let _ = self.events.send(ClientEvent::TimelineUpdated { peer_id });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
