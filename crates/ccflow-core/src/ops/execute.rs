//! Transaction executor.
//!
//! `invoke` endorses and submits, returning a record whose validation stays
//! `Pending` until a transaction-status event says otherwise. `query` only
//! endorses and returns the payload. Neither retries.

use crate::{
    ids::{ChaincodeId, PeerId, TxId},
    log,
    log::Topic,
    ops::{
        event::TxStatusEvent,
        session::{Endorsement, Proposal, Session, Targets, TransportError, ValidationCode},
    },
};
use derive_more::Display;
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// ExecutionError
///

#[derive(Debug, ThisError)]
pub enum ExecutionError {
    #[error("chaincode error from {peer} (status {status}): {message}")]
    Chaincode {
        peer: PeerId,
        status: u16,
        message: String,
    },

    #[error("endorsers returned diverging payloads for tx {tx_id}")]
    EndorsementMismatch { tx_id: TxId },

    #[error("endorser target set is empty")]
    EmptyEndorsers,

    #[error(transparent)]
    Network(#[from] TransportError),

    #[error("no endorsements collected for tx {tx_id}")]
    NoEndorsements { tx_id: TxId },
}

impl ExecutionError {
    /// The chaincode's own error message, when the failure came from it.
    #[must_use]
    pub fn chaincode_message(&self) -> Option<&str> {
        match self {
            Self::Chaincode { message, .. } => Some(message),
            _ => None,
        }
    }
}

///
/// TxValidation
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TxValidation {
    Pending,
    Committed,
    #[display("Invalid({_0})")]
    Invalid(ValidationCode),
}

///
/// TransactionRecord
///

#[derive(Clone, Debug)]
pub struct TransactionRecord {
    pub tx_id: TxId,
    pub chaincode: ChaincodeId,
    pub function: String,
    pub validation: TxValidation,
    pub endorsements: Vec<Endorsement>,
}

impl TransactionRecord {
    /// Move out of `Pending` on a matching status event. Returns whether the
    /// record changed.
    pub fn apply_status(&mut self, event: &TxStatusEvent) -> bool {
        if event.tx_id != self.tx_id || self.validation != TxValidation::Pending {
            return false;
        }

        self.validation = if event.validation_code.is_valid() {
            TxValidation::Committed
        } else {
            TxValidation::Invalid(event.validation_code)
        };

        true
    }

    #[must_use]
    pub fn endorsing_peers(&self) -> Vec<PeerId> {
        self.endorsements.iter().map(|e| e.peer.clone()).collect()
    }
}

/// Convert string-like arguments into raw chaincode arguments.
pub fn to_args<I, S>(args: I) -> Vec<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    args.into_iter().map(|a| a.as_ref().to_vec()).collect()
}

///
/// Executor
///

#[derive(Clone)]
pub struct Executor {
    session: Arc<dyn Session>,
    chaincode: ChaincodeId,
}

impl Executor {
    #[must_use]
    pub fn new(session: Arc<dyn Session>, chaincode: ChaincodeId) -> Self {
        Self { session, chaincode }
    }

    #[must_use]
    pub const fn chaincode(&self) -> &ChaincodeId {
        &self.chaincode
    }

    /// Endorse and submit one transaction. Calling this twice creates two
    /// ledger transactions.
    pub async fn invoke(
        &self,
        function: &str,
        args: Vec<Vec<u8>>,
        endorsers: &Targets,
    ) -> Result<TransactionRecord, ExecutionError> {
        let proposal = self.proposal(function, args);
        let endorsements = self.endorse(&proposal, endorsers).await?;

        self.session.submit(&proposal, &endorsements).await?;

        log!(
            Topic::Execute,
            Info,
            "invoke {}.{function} submitted as {} ({} endorsements)",
            self.chaincode,
            proposal.tx_id,
            endorsements.len()
        );

        Ok(TransactionRecord {
            tx_id: proposal.tx_id,
            chaincode: proposal.chaincode,
            function: proposal.function,
            validation: TxValidation::Pending,
            endorsements,
        })
    }

    /// Evaluate a read-only call. Safe to retry.
    pub async fn query(
        &self,
        function: &str,
        args: Vec<Vec<u8>>,
        endorsers: &Targets,
    ) -> Result<Vec<u8>, ExecutionError> {
        let proposal = self.proposal(function, args);
        let mut endorsements = self.endorse(&proposal, endorsers).await?;

        log!(
            Topic::Execute,
            Debug,
            "query {}.{function} answered by {}",
            self.chaincode,
            endorsements.len()
        );

        Ok(endorsements.swap_remove(0).payload)
    }

    fn proposal(&self, function: &str, args: Vec<Vec<u8>>) -> Proposal {
        let creator = self.session.context().creator();

        Proposal {
            tx_id: TxId::generate(&creator),
            chaincode: self.chaincode.clone(),
            function: function.to_string(),
            args,
        }
    }

    // Non-empty, all-success, payload-consistent endorsements or an error.
    async fn endorse(
        &self,
        proposal: &Proposal,
        endorsers: &Targets,
    ) -> Result<Vec<Endorsement>, ExecutionError> {
        if matches!(endorsers, Targets::Peers(peers) if peers.is_empty()) {
            return Err(ExecutionError::EmptyEndorsers);
        }

        let endorsements = self.session.endorse(proposal, endorsers).await?;

        if let Some(failed) = endorsements.iter().find(|e| !e.is_success()) {
            return Err(ExecutionError::Chaincode {
                peer: failed.peer.clone(),
                status: failed.status,
                message: failed.message.clone(),
            });
        }

        let Some(first) = endorsements.first() else {
            return Err(ExecutionError::NoEndorsements {
                tx_id: proposal.tx_id.clone(),
            });
        };
        if endorsements.iter().any(|e| e.payload != first.payload) {
            return Err(ExecutionError::EndorsementMismatch {
                tx_id: proposal.tx_id.clone(),
            });
        }

        Ok(endorsements)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TransactionRecord {
        TransactionRecord {
            tx_id: TxId::new("tx1"),
            chaincode: ChaincodeId::new("mycc"),
            function: "set".to_string(),
            validation: TxValidation::Pending,
            endorsements: Vec::new(),
        }
    }

    fn status(tx: &str, code: ValidationCode) -> TxStatusEvent {
        TxStatusEvent {
            tx_id: TxId::new(tx),
            validation_code: code,
            block_number: 4,
            source: "peer0".to_string(),
        }
    }

    #[test]
    fn record_moves_out_of_pending_once() {
        let mut rec = record();

        assert!(!rec.apply_status(&status("other", ValidationCode::Valid)));
        assert!(rec.apply_status(&status("tx1", ValidationCode::Valid)));
        assert_eq!(rec.validation, TxValidation::Committed);
        assert!(!rec.apply_status(&status(
            "tx1",
            ValidationCode::EndorsementPolicyFailure
        )));
        assert_eq!(rec.validation, TxValidation::Committed);
    }

    #[test]
    fn invalid_status_keeps_the_code() {
        let mut rec = record();
        rec.apply_status(&status("tx1", ValidationCode::EndorsementPolicyFailure));

        assert_eq!(
            rec.validation,
            TxValidation::Invalid(ValidationCode::EndorsementPolicyFailure)
        );
    }

    #[test]
    fn args_are_copied_verbatim() {
        assert_eq!(
            to_args(["a", "10"]),
            vec![b"a".to_vec(), b"10".to_vec()]
        );
    }
}
