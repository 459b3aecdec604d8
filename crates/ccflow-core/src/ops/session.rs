//! Network session boundary.
//!
//! A [`Session`] is an already-established, authenticated connection scoped
//! to one (organization, identity, channel). Authentication, transport
//! security and membership credentials live behind it; the orchestration
//! core only sees the request/response shapes defined here.
//!
//! Implementations must be safe to share read-only across tasks.

use crate::{
    domain::policy::{
        deploy::DeployMode,
        endorsement::{SignaturePolicyEnvelope, Signer},
    },
    ids::{ChaincodeId, ChaincodeRef, ChannelId, MspId, OrgId, PeerId, TxId, Version},
    ops::package::PackageArtifact,
};
use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, sync::Arc};
use thiserror::Error as ThisError;
use tokio::sync::broadcast;

/// Status reported by peers for a successful call.
pub const STATUS_OK: u16 = 200;

///
/// TransportError
/// The network produced no response at all.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TransportError {
    #[error("no response from {endpoint}: {reason}")]
    NoResponse { endpoint: String, reason: String },

    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("session is closed")]
    Closed,
}

impl TransportError {
    pub fn no_response(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoResponse {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

///
/// SessionContext
/// Who the session acts as, and where.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SessionContext {
    pub org: OrgId,
    pub msp_id: MspId,
    pub admin: String,
    pub user: String,
    pub channel: ChannelId,
}

impl SessionContext {
    /// Serialized creator identity used when deriving transaction ids.
    #[must_use]
    pub fn creator(&self) -> Vec<u8> {
        format!("{}/{}", self.msp_id, self.user).into_bytes()
    }
}

///
/// Targets
///
/// Peer selection for one call. `NetworkDefault` is a distinct mode: the
/// network picks endorsers itself. An explicit set is never reinterpreted
/// as the default, even when empty.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Targets {
    Peers(BTreeSet<PeerId>),
    NetworkDefault,
}

impl Targets {
    pub fn peers<I, P>(peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Self::Peers(peers.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn explicit(&self) -> Option<&BTreeSet<PeerId>> {
        match self {
            Self::Peers(peers) => Some(peers),
            Self::NetworkDefault => None,
        }
    }
}

impl fmt::Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peers(peers) => {
                let names: Vec<&str> = peers.iter().map(PeerId::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            }
            Self::NetworkDefault => f.write_str("<network default>"),
        }
    }
}

///
/// PeerResponse
/// Per-peer outcome of an install/instantiate/upgrade call.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PeerResponse {
    pub target: PeerId,
    pub status: u16,
    pub message: String,
}

impl PeerResponse {
    pub fn ok(target: PeerId, message: impl Into<String>) -> Self {
        Self {
            target,
            status: STATUS_OK,
            message: message.into(),
        }
    }

    pub fn error(target: PeerId, status: u16, message: impl Into<String>) -> Self {
        Self {
            target,
            status,
            message: message.into(),
        }
    }
}

///
/// InstallRequest
///

#[derive(Clone, Debug)]
pub struct InstallRequest {
    pub chaincode: ChaincodeRef,
    pub path: String,
    pub package: Arc<PackageArtifact>,
}

///
/// DeployRequest
/// Instantiate or upgrade request; `args` are handed to the chaincode's Init.
///

#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub chaincode: ChaincodeRef,
    pub path: String,
    pub args: Vec<Vec<u8>>,
    pub policy: SignaturePolicyEnvelope,
}

///
/// DeployResponse
///

#[derive(Clone, Debug, Default)]
pub struct DeployResponse {
    pub tx_id: Option<TxId>,
    pub responses: Vec<PeerResponse>,
}

///
/// Proposal
/// Invoke or query proposal with a client-derived transaction id.
///

#[derive(Clone, Debug)]
pub struct Proposal {
    pub tx_id: TxId,
    pub chaincode: ChaincodeId,
    pub function: String,
    pub args: Vec<Vec<u8>>,
}

///
/// Endorsement
/// One peer's simulated execution result plus the signing identity.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endorsement {
    pub peer: PeerId,
    pub signer: Signer,
    pub status: u16,
    pub message: String,
    pub payload: Vec<u8>,
}

impl Endorsement {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status < crate::domain::policy::idempotency::ERROR_STATUS_THRESHOLD
    }
}

///
/// ChaincodeInfo
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ChaincodeInfo {
    pub name: ChaincodeId,
    pub version: Version,
    pub path: String,
}

///
/// ValidationCode
/// Commit-time verdict for one transaction.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[remain::sorted]
pub enum ValidationCode {
    DuplicateTxId,
    EndorsementPolicyFailure,
    InvalidOtherReason,
    MvccReadConflict,
    Valid,
}

impl ValidationCode {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

///
/// ChaincodeEventRecord
/// Event set by the chaincode during execution; payload is opaque.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChaincodeEventRecord {
    pub chaincode_id: ChaincodeId,
    pub event_name: String,
    pub payload: Vec<u8>,
}

///
/// BlockTransaction
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTransaction {
    pub tx_id: TxId,
    pub validation_code: ValidationCode,
    pub chaincode_event: Option<ChaincodeEventRecord>,
}

///
/// Block
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub number: u64,
    pub data_hash: Vec<u8>,
    pub previous_hash: Vec<u8>,
    pub transactions: Vec<BlockTransaction>,
}

///
/// DeliveredBlock
/// A committed block as delivered by one source peer.
///

#[derive(Clone, Debug)]
pub struct DeliveredBlock {
    pub block: Arc<Block>,
    pub source: String,
}

///
/// Session
///

#[async_trait]
pub trait Session: Send + Sync {
    fn context(&self) -> &SessionContext;

    /// Install a package on every target peer in one network call.
    async fn install(
        &self,
        request: &InstallRequest,
        targets: &BTreeSet<PeerId>,
    ) -> Result<Vec<PeerResponse>, TransportError>;

    /// Instantiate or upgrade on the session's channel.
    async fn deploy(
        &self,
        mode: DeployMode,
        request: &DeployRequest,
        targets: &Targets,
    ) -> Result<DeployResponse, TransportError>;

    /// Collect endorsements for a proposal without ordering it.
    async fn endorse(
        &self,
        proposal: &Proposal,
        endorsers: &Targets,
    ) -> Result<Vec<Endorsement>, TransportError>;

    /// Send an endorsed transaction to ordering. Returns once it is accepted
    /// for ordering, not when it commits.
    async fn submit(
        &self,
        proposal: &Proposal,
        endorsements: &[Endorsement],
    ) -> Result<(), TransportError>;

    async fn query_installed(&self, peer: &PeerId) -> Result<Vec<ChaincodeInfo>, TransportError>;

    async fn query_instantiated(&self) -> Result<Vec<ChaincodeInfo>, TransportError>;

    /// Open the channel's committed-block stream, starting at the newest block.
    async fn deliver(&self) -> Result<broadcast::Receiver<DeliveredBlock>, TransportError>;
}
