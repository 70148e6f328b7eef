//! The borrowing-agreement workflow that rides on FORM messages.
//!
//! PENDING -> ACCEPTED and PENDING -> REJECTED are the only legal
//! transitions, both terminal. Guards run locally before the collaborator is
//! ever invoked, so a stale or unauthorized respond never leaves the client.

use std::sync::Arc;

use shared::{
    domain::{AgreementDecision, AgreementId, AgreementStatus, UserId},
    error::CollaboratorError,
    protocol::{Agreement, NewAgreement},
};
use thiserror::Error;
use tracing::info;

use crate::{collaborators::AgreementService, store::AgreementContext, Conversation};

#[derive(Debug, Error)]
pub enum AgreementError {
    #[error("no agreement {0} in this conversation")]
    UnknownAgreement(AgreementId),
    #[error("agreement {id} is already {status:?}")]
    AlreadyResolved {
        id: AgreementId,
        status: AgreementStatus,
    },
    #[error("only the lender may respond to a borrowing request")]
    NotLender,
    #[error("agreement {0} was not proposed by the borrower")]
    NotBorrowerProposal(AgreementId),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

pub struct AgreementStateMachine {
    service: Arc<dyn AgreementService>,
}

impl AgreementStateMachine {
    pub fn new(service: Arc<dyn AgreementService>) -> Self {
        Self { service }
    }

    /// Create a new agreement through the collaborator. A duplicate pending
    /// agreement for the same item surfaces as a conflict.
    pub async fn propose(&self, request: &NewAgreement) -> Result<Agreement, AgreementError> {
        let created = self.service.create(request).await?;
        info!(
            agreement_id = created.id.0,
            item = %created.item_name,
            "agreement proposed"
        );
        Ok(created)
    }

    /// Resolve a pending agreement. Runs the local guards against the
    /// conversation's current copy, then asks the collaborator for the
    /// authoritative transition. The caller is responsible for re-publishing
    /// the updated agreement and patching the store afterwards.
    pub async fn respond(
        &self,
        responder: &UserId,
        conversation: &Conversation,
        agreement_id: AgreementId,
        decision: AgreementDecision,
    ) -> Result<Agreement, AgreementError> {
        let context = conversation
            .agreement_context(agreement_id)
            .await
            .ok_or(AgreementError::UnknownAgreement(agreement_id))?;
        guard_respond(responder, &context)?;

        let updated = self.service.update_status(agreement_id, decision).await?;
        info!(
            agreement_id = agreement_id.0,
            status = ?updated.status,
            "agreement resolved"
        );
        Ok(updated)
    }
}

/// Terminal-state and authorization guards, enforced locally regardless of
/// server-side checks.
fn guard_respond(responder: &UserId, context: &AgreementContext) -> Result<(), AgreementError> {
    if context.agreement.status.is_terminal() {
        return Err(AgreementError::AlreadyResolved {
            id: context.agreement.id,
            status: context.agreement.status,
        });
    }
    if context.agreement.lender_id != *responder {
        return Err(AgreementError::NotLender);
    }
    if context.message_sender != context.agreement.borrower_id {
        return Err(AgreementError::NotBorrowerProposal(context.agreement.id));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/agreement_tests.rs"]
mod tests;
