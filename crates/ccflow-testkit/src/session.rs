use crate::network::SimNetwork;
use async_trait::async_trait;
use ccflow_core::{
    domain::policy::deploy::DeployMode,
    ids::PeerId,
    ops::session::{
        ChaincodeInfo, DeliveredBlock, DeployRequest, DeployResponse, Endorsement, InstallRequest,
        PeerResponse, Proposal, Session, SessionContext, Targets, TransportError,
    },
};
use std::collections::BTreeSet;
use tokio::sync::broadcast;

///
/// SimSession
/// One org's authenticated view of a [`SimNetwork`].
///

pub struct SimSession {
    context: SessionContext,
    network: SimNetwork,
}

impl SimSession {
    pub(crate) const fn new(context: SessionContext, network: SimNetwork) -> Self {
        Self { context, network }
    }

    #[must_use]
    pub const fn network(&self) -> &SimNetwork {
        &self.network
    }
}

#[async_trait]
impl Session for SimSession {
    fn context(&self) -> &SessionContext {
        &self.context
    }

    async fn install(
        &self,
        request: &InstallRequest,
        targets: &BTreeSet<PeerId>,
    ) -> Result<Vec<PeerResponse>, TransportError> {
        self.network
            .ledger()
            .install(&self.context, request, targets)
    }

    async fn deploy(
        &self,
        mode: DeployMode,
        request: &DeployRequest,
        targets: &Targets,
    ) -> Result<DeployResponse, TransportError> {
        self.network
            .ledger()
            .deploy(&self.context, mode, request, targets)
    }

    async fn endorse(
        &self,
        proposal: &Proposal,
        endorsers: &Targets,
    ) -> Result<Vec<Endorsement>, TransportError> {
        self.network
            .ledger()
            .endorse(&self.context, proposal, endorsers)
    }

    async fn submit(
        &self,
        proposal: &Proposal,
        endorsements: &[Endorsement],
    ) -> Result<(), TransportError> {
        self.network.ledger().submit(proposal, endorsements)
    }

    async fn query_installed(&self, peer: &PeerId) -> Result<Vec<ChaincodeInfo>, TransportError> {
        self.network.ledger().query_installed(peer)
    }

    async fn query_instantiated(&self) -> Result<Vec<ChaincodeInfo>, TransportError> {
        self.network.ledger().query_instantiated()
    }

    async fn deliver(&self) -> Result<broadcast::Receiver<DeliveredBlock>, TransportError> {
        self.network.ledger().deliver()
    }
}
