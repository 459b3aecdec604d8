//! Peer operation dispatcher.
//!
//! One logical install/instantiate/upgrade goes out in a single session call;
//! the per-peer responses come back and are folded into one outcome by
//! [`aggregate`]. Idempotent conflicts are downgraded to success, the first
//! real failure crosses the boundary, and every per-peer failure is logged.

use crate::{
    domain::policy::{
        deploy::DeployMode,
        idempotency::{OperationKind, ResponseClass, classify_response},
    },
    ids::{ChaincodeRef, PeerId, TxId},
    log,
    log::Topic,
    ops::session::{DeployRequest, InstallRequest, PeerResponse, Session, Targets, TransportError},
};
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// DispatchError
///

#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("{kind} requires an explicit peer target set")]
    TargetsRequired { kind: OperationKind },

    #[error("{kind} target set is empty")]
    EmptyTargets { kind: OperationKind },

    #[error("{kind} transport failure: {source}")]
    Transport {
        kind: OperationKind,
        #[source]
        source: TransportError,
    },

    #[error("{kind} rejected by {peer} (status {status}): {message}")]
    PeerRejected {
        kind: OperationKind,
        peer: PeerId,
        status: u16,
        message: String,
        failures: Vec<PeerFailure>,
    },
}

impl DispatchError {
    /// Every per-peer failure behind a rejection, first one included.
    #[must_use]
    pub fn failures(&self) -> &[PeerFailure] {
        match self {
            Self::PeerRejected { failures, .. } => failures,
            _ => &[],
        }
    }
}

///
/// PeerFailure
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerFailure {
    pub peer: PeerId,
    pub status: u16,
    pub message: String,
    pub class: ResponseClass,
}

impl fmt::Display for PeerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] status={} {}",
            self.peer, self.class, self.status, self.message
        )
    }
}

///
/// PeerOperation
///

#[derive(Clone, Debug)]
pub enum PeerOperation {
    Install(InstallRequest),
    Instantiate(DeployRequest),
    Upgrade(DeployRequest),
}

impl PeerOperation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Install(_) => OperationKind::Install,
            Self::Instantiate(_) => OperationKind::Instantiate,
            Self::Upgrade(_) => OperationKind::Upgrade,
        }
    }

    #[must_use]
    pub const fn chaincode(&self) -> &ChaincodeRef {
        match self {
            Self::Install(req) => &req.chaincode,
            Self::Instantiate(req) | Self::Upgrade(req) => &req.chaincode,
        }
    }
}

///
/// DispatchOutcome
/// Aggregated success. `conflicts` lists peers that reported the work as
/// already done.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DispatchOutcome {
    pub tx_id: Option<TxId>,
    pub applied: Vec<PeerId>,
    pub conflicts: Vec<PeerFailure>,
}

impl DispatchOutcome {
    /// True when no peer did any new work.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && !self.conflicts.is_empty()
    }
}

///
/// aggregate
///
/// Fold per-peer responses into one result. Pure; logging is the caller's.
///

pub fn aggregate(
    kind: OperationKind,
    responses: &[PeerResponse],
) -> Result<DispatchOutcome, DispatchError> {
    let mut outcome = DispatchOutcome::default();
    let mut failures = Vec::new();

    for response in responses {
        match classify_response(kind, response.status, &response.message) {
            ResponseClass::Success => outcome.applied.push(response.target.clone()),
            class => {
                let failure = PeerFailure {
                    peer: response.target.clone(),
                    status: response.status,
                    message: response.message.clone(),
                    class,
                };
                if class.is_failure() {
                    failures.push(failure);
                } else {
                    outcome.conflicts.push(failure);
                }
            }
        }
    }

    let Some(first) = failures.first().cloned() else {
        return Ok(outcome);
    };

    Err(DispatchError::PeerRejected {
        kind,
        peer: first.peer,
        status: first.status,
        message: first.message,
        failures,
    })
}

///
/// Dispatcher
///

#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<dyn Session>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Send one operation to `targets` and aggregate the per-peer responses.
    pub async fn dispatch(
        &self,
        op: &PeerOperation,
        targets: &Targets,
    ) -> Result<DispatchOutcome, DispatchError> {
        let kind = op.kind();
        let endpoint = self.session.context().org.to_string();

        match targets {
            Targets::Peers(peers) if peers.is_empty() => {
                return Err(DispatchError::EmptyTargets { kind });
            }
            Targets::NetworkDefault if kind.requires_explicit_targets() => {
                return Err(DispatchError::TargetsRequired { kind });
            }
            _ => {}
        }

        let (tx_id, responses) = match op {
            PeerOperation::Install(request) => {
                let peers = targets
                    .explicit()
                    .ok_or(DispatchError::TargetsRequired { kind })?;

                let responses = self
                    .session
                    .install(request, peers)
                    .await
                    .map_err(|source| DispatchError::Transport { kind, source })?;

                (None, responses)
            }
            PeerOperation::Instantiate(request) | PeerOperation::Upgrade(request) => {
                let mode = if kind == OperationKind::Upgrade {
                    DeployMode::Upgrade
                } else {
                    DeployMode::Instantiate
                };

                let response = self
                    .session
                    .deploy(mode, request, targets)
                    .await
                    .map_err(|source| DispatchError::Transport { kind, source })?;

                (response.tx_id, response.responses)
            }
        };

        // no response at all is a transport failure, never an empty success
        if responses.is_empty() {
            return Err(DispatchError::Transport {
                kind,
                source: TransportError::no_response(endpoint, "no peer responses"),
            });
        }

        let result = aggregate(kind, &responses);
        Self::log_result(kind, op.chaincode(), targets, &result);

        result.map(|mut outcome| {
            outcome.tx_id = tx_id;
            outcome
        })
    }

    fn log_result(
        kind: OperationKind,
        chaincode: &ChaincodeRef,
        targets: &Targets,
        result: &Result<DispatchOutcome, DispatchError>,
    ) {
        match result {
            Ok(outcome) => {
                for conflict in &outcome.conflicts {
                    log!(
                        Topic::Dispatch,
                        Info,
                        "{kind} {chaincode}: treated as done ({conflict})"
                    );
                }
                log!(
                    Topic::Dispatch,
                    Ok,
                    "{kind} {chaincode} on {targets}: {} applied, {} already done",
                    outcome.applied.len(),
                    outcome.conflicts.len()
                );
            }
            Err(err) => {
                let failures = err.failures();
                for failure in failures {
                    log!(Topic::Dispatch, Warn, "{kind} {chaincode}: {failure}");
                }
                log!(
                    Topic::Dispatch,
                    Error,
                    "{kind} {chaincode} on {targets} failed ({} peer failures): {err}",
                    failures.len()
                );
            }
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::policy::endorsement::PolicyBuilder,
        ids::{ChaincodeId, ChannelId, MspId, OrgId, Version},
        ops::{
            package::PackageArtifact,
            session::{
                ChaincodeInfo, DeliveredBlock, DeployResponse, Endorsement, Proposal,
                SessionContext,
            },
        },
    };
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tokio::sync::broadcast;

    // Session whose every call fails; target checks must not reach it.
    struct Closed(SessionContext);

    #[async_trait]
    impl Session for Closed {
        fn context(&self) -> &SessionContext {
            &self.0
        }

        async fn install(
            &self,
            _: &InstallRequest,
            _: &BTreeSet<PeerId>,
        ) -> Result<Vec<PeerResponse>, TransportError> {
            Err(TransportError::Closed)
        }

        async fn deploy(
            &self,
            _: DeployMode,
            _: &DeployRequest,
            _: &Targets,
        ) -> Result<DeployResponse, TransportError> {
            Err(TransportError::Closed)
        }

        async fn endorse(&self, _: &Proposal, _: &Targets) -> Result<Vec<Endorsement>, TransportError> {
            Err(TransportError::Closed)
        }

        async fn submit(&self, _: &Proposal, _: &[Endorsement]) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }

        async fn query_installed(&self, _: &PeerId) -> Result<Vec<ChaincodeInfo>, TransportError> {
            Err(TransportError::Closed)
        }

        async fn query_instantiated(&self) -> Result<Vec<ChaincodeInfo>, TransportError> {
            Err(TransportError::Closed)
        }

        async fn deliver(&self) -> Result<broadcast::Receiver<DeliveredBlock>, TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Closed(SessionContext {
            org: OrgId::new("Org1"),
            msp_id: MspId::new("Org1MSP"),
            admin: "Admin".to_string(),
            user: "User1".to_string(),
            channel: ChannelId::new("mychannel"),
        })))
    }

    fn chaincode() -> ChaincodeRef {
        ChaincodeRef::new(ChaincodeId::new("mycc"), Version::new("v1"))
    }

    fn install() -> PeerOperation {
        PeerOperation::Install(InstallRequest {
            chaincode: chaincode(),
            path: "cc/kv".to_string(),
            package: Arc::new(PackageArtifact {
                name: ChaincodeId::new("mycc"),
                path: "cc/kv".to_string(),
                bytes: Vec::new(),
                hash: [0; 32],
                file_count: 0,
            }),
        })
    }

    fn instantiate() -> PeerOperation {
        PeerOperation::Instantiate(DeployRequest {
            chaincode: chaincode(),
            path: "cc/kv".to_string(),
            args: Vec::new(),
            policy: PolicyBuilder::new(MspId::new("Org1MSP")).build("ANY").unwrap(),
        })
    }

    #[tokio::test]
    async fn install_requires_explicit_non_empty_targets() {
        let dispatcher = dispatcher();

        assert!(matches!(
            dispatcher.dispatch(&install(), &Targets::NetworkDefault).await,
            Err(DispatchError::TargetsRequired { kind: OperationKind::Install })
        ));
        assert!(matches!(
            dispatcher.dispatch(&install(), &Targets::Peers(BTreeSet::new())).await,
            Err(DispatchError::EmptyTargets { kind: OperationKind::Install })
        ));
        assert!(matches!(
            dispatcher.dispatch(&install(), &Targets::peers(["peer0"])).await,
            Err(DispatchError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn deploy_accepts_network_default_but_not_an_empty_set() {
        let dispatcher = dispatcher();

        assert!(matches!(
            dispatcher.dispatch(&instantiate(), &Targets::Peers(BTreeSet::new())).await,
            Err(DispatchError::EmptyTargets { kind: OperationKind::Instantiate })
        ));
        assert!(matches!(
            dispatcher.dispatch(&instantiate(), &Targets::NetworkDefault).await,
            Err(DispatchError::Transport { .. })
        ));
    }

    fn ok(peer: &'static str) -> PeerResponse {
        PeerResponse::ok(PeerId::new(peer), "")
    }

    fn err(peer: &'static str, status: u16, message: &str) -> PeerResponse {
        PeerResponse::error(PeerId::new(peer), status, message)
    }

    #[test]
    fn only_idempotent_failures_is_success() {
        let responses = vec![
            ok("peer0"),
            err("peer1", 500, "chaincode mycc:v1 already installed"),
            err("peer2", 500, "Already Installed"),
        ];

        let outcome = aggregate(OperationKind::Install, &responses).expect("success");
        assert_eq!(outcome.applied, vec![PeerId::new("peer0")]);
        assert_eq!(outcome.conflicts.len(), 2);
        assert!(!outcome.is_noop());
    }

    #[test]
    fn all_conflicts_is_a_noop() {
        let responses = vec![err("peer0", 500, "chaincode mycc already exists")];

        let outcome = aggregate(OperationKind::Instantiate, &responses).expect("success");
        assert!(outcome.is_noop());
    }

    #[test]
    fn first_real_failure_wins_and_all_are_reachable() {
        let responses = vec![
            ok("peer0"),
            err("peer1", 500, "already installed"),
            err("peer2", 503, "peer unavailable"),
            err("peer3", 500, "disk full"),
        ];

        let err = aggregate(OperationKind::Install, &responses).expect_err("failure");
        match &err {
            DispatchError::PeerRejected {
                peer,
                status,
                failures,
                ..
            } => {
                assert_eq!(peer, &PeerId::new("peer2"));
                assert_eq!(*status, 503);
                let peers: Vec<&str> = failures.iter().map(|f| f.peer.as_str()).collect();
                assert_eq!(peers, vec!["peer2", "peer3"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn install_marker_does_not_excuse_deploy() {
        let responses = vec![err("peer0", 500, "already installed")];

        assert!(aggregate(OperationKind::Upgrade, &responses).is_err());
    }
}
