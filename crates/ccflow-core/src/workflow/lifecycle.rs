//! Lifecycle coordinator.
//!
//! Channel-wide state machine for one chaincode:
//!
//! ```text
//! Unpackaged -> Installed -> Instantiated(v) -> Ready(v)
//!                                                 |
//!                            Ready(v+1) <- Instantiated(v+1) <- Upgrading
//! ```
//!
//! Each step awaits its network round trip before the next one starts.
//! Installs across organizations run concurrently; everything else is
//! strictly sequential. Install and instantiate conflicts reported by the
//! network are success.

use crate::{
    Error,
    domain::policy::{
        deploy::{DeployPlan, plan_deploy},
        endorsement::{PolicyBuilder, SignaturePolicyEnvelope},
    },
    ids::{ChaincodeId, ChaincodeRef, ChannelId, MspId, OrgId, PeerId, TxId, Version},
    log,
    log::Topic,
    ops::{
        dispatch::{DispatchOutcome, Dispatcher, PeerOperation},
        execute::{ExecutionError, Executor, TransactionRecord},
        package::PackageArtifact,
        session::{DeployRequest, InstallRequest, Session, Targets},
    },
    workflow::confirm::{ConfirmSummary, TxConfirmer},
};
use derive_more::Display;
use futures::future::try_join_all;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use thiserror::Error as ThisError;

///
/// LifecycleError
///

#[derive(Debug, ThisError)]
pub enum LifecycleError {
    #[error("{chaincode} is already active at {active}; use upgrade")]
    AlreadyInstantiated { chaincode: ChaincodeId, active: Version },

    #[error("session for org '{org}' is bound to channel '{found}', expected '{expected}'")]
    ChannelMismatch {
        org: OrgId,
        expected: ChannelId,
        found: ChannelId,
    },

    #[error("peer '{peer}' appears in more than one install target")]
    DuplicateInstallTarget { peer: PeerId },

    #[error("org '{0}' is already registered")]
    DuplicateOrg(OrgId),

    #[error("network reports {chaincode} as existing but lists no active version")]
    NoActiveVersion { chaincode: ChaincodeId },

    #[error("waiting for commit requires a transaction confirmer")]
    NoConfirmer,

    #[error("no install targets given")]
    NoInstallTargets,

    #[error("{chaincode}:{version} is not installed on any peer")]
    NotInstalled { chaincode: ChaincodeId, version: Version },

    #[error("cannot {operation} while {chaincode} is {state}")]
    NotReady {
        operation: &'static str,
        chaincode: ChaincodeId,
        state: LifecycleState,
    },

    #[error("package '{found}' does not match chaincode '{expected}'")]
    PackageMismatch {
        expected: ChaincodeId,
        found: ChaincodeId,
    },

    #[error("unknown org '{0}'")]
    UnknownOrg(OrgId),
}

///
/// LifecycleState
///

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum LifecycleState {
    Unpackaged,
    Installed,
    #[display("Instantiated({_0})")]
    Instantiated(Version),
    #[display("Ready({_0})")]
    Ready(Version),
    #[display("Upgrading({from} -> {to})")]
    Upgrading { from: Version, to: Version },
}

impl LifecycleState {
    /// Version serving transactions, if any.
    #[must_use]
    pub const fn active_version(&self) -> Option<&Version> {
        match self {
            Self::Ready(v) | Self::Instantiated(v) | Self::Upgrading { from: v, .. } => Some(v),
            Self::Unpackaged | Self::Installed => None,
        }
    }
}

///
/// Deployment
///
/// One activated version. Each upgrade appends a new descriptor with the
/// next sequence number; earlier ones are never mutated.
///

#[derive(Clone, Debug)]
pub struct Deployment {
    pub chaincode: ChaincodeId,
    pub path: String,
    pub version: Version,
    pub sequence: u64,
    pub policy: Option<SignaturePolicyEnvelope>,
    pub orgs: BTreeSet<OrgId>,
    pub peers: BTreeSet<PeerId>,
    pub tx_id: Option<TxId>,
}

///
/// DeploySpec
/// Policy expressions and Init arguments for each deploy mode.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeploySpec {
    pub instantiate_policy: String,
    pub upgrade_policy: String,
    pub init_args: Vec<Vec<u8>>,
    pub upgrade_args: Vec<Vec<u8>>,
}

impl DeploySpec {
    pub fn new(instantiate_policy: impl Into<String>, upgrade_policy: impl Into<String>) -> Self {
        Self {
            instantiate_policy: instantiate_policy.into(),
            upgrade_policy: upgrade_policy.into(),
            ..Self::default()
        }
    }
}

///
/// DeployStep
///

#[derive(Clone, Debug)]
pub struct DeployStep {
    pub plan: DeployPlan,
    pub version: Version,
    /// `None` when nothing was sent to the network.
    pub outcome: Option<DispatchOutcome>,
}

impl DeployStep {
    const fn noop(version: Version) -> Self {
        Self {
            plan: DeployPlan::AlreadyActive,
            version,
            outcome: None,
        }
    }
}

///
/// InstallTarget
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallTarget {
    pub org: OrgId,
    pub peers: BTreeSet<PeerId>,
}

impl InstallTarget {
    pub fn new<I, P>(org: OrgId, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Self {
            org,
            peers: peers.into_iter().map(Into::into).collect(),
        }
    }
}

///
/// InstallOutcome
///

#[derive(Clone, Debug)]
pub struct InstallOutcome {
    pub org: OrgId,
    pub outcome: DispatchOutcome,
}

///
/// OrgClient
/// One organization's session plus the peers it administers.
///

#[derive(Clone)]
pub struct OrgClient {
    session: Arc<dyn Session>,
    peers: BTreeSet<PeerId>,
}

impl OrgClient {
    pub fn new<I>(session: Arc<dyn Session>, peers: I) -> Self
    where
        I: IntoIterator<Item = PeerId>,
    {
        Self {
            session,
            peers: peers.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn org(&self) -> &OrgId {
        &self.session.context().org
    }

    #[must_use]
    pub fn msp_id(&self) -> &MspId {
        &self.session.context().msp_id
    }

    #[must_use]
    pub const fn peers(&self) -> &BTreeSet<PeerId> {
        &self.peers
    }

    #[must_use]
    pub const fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.session))
    }

    fn executor(&self, chaincode: ChaincodeId) -> Executor {
        Executor::new(Arc::clone(&self.session), chaincode)
    }
}

///
/// LifecycleCoordinator
///

pub struct LifecycleCoordinator {
    channel: ChannelId,
    chaincode: ChaincodeId,
    path: String,
    orgs: BTreeMap<OrgId, OrgClient>,
    state: LifecycleState,
    installed: BTreeMap<Version, BTreeSet<PeerId>>,
    history: Vec<Deployment>,
    confirmer: Option<TxConfirmer>,
}

impl LifecycleCoordinator {
    pub fn new(channel: ChannelId, chaincode: ChaincodeId, path: impl Into<String>) -> Self {
        Self {
            channel,
            chaincode,
            path: path.into(),
            orgs: BTreeMap::new(),
            state: LifecycleState::Unpackaged,
            installed: BTreeMap::new(),
            history: Vec::new(),
            confirmer: None,
        }
    }

    /// Register an organization's client. Its session must be bound to
    /// this coordinator's channel.
    pub fn add_org(&mut self, client: OrgClient) -> Result<(), LifecycleError> {
        let ctx = client.session.context();
        if ctx.channel != self.channel {
            return Err(LifecycleError::ChannelMismatch {
                org: ctx.org.clone(),
                expected: self.channel.clone(),
                found: ctx.channel.clone(),
            });
        }

        let org = ctx.org.clone();
        if self.orgs.contains_key(&org) {
            return Err(LifecycleError::DuplicateOrg(org));
        }
        self.orgs.insert(org, client);

        Ok(())
    }

    /// Enqueue every invoked transaction into `confirmer`.
    #[must_use]
    pub fn with_confirmer(mut self, confirmer: TxConfirmer) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    #[must_use]
    pub const fn has_confirmer(&self) -> bool {
        self.confirmer.is_some()
    }

    #[must_use]
    pub const fn confirmer_mut(&mut self) -> Option<&mut TxConfirmer> {
        self.confirmer.as_mut()
    }

    /// Stop the confirmer, releasing its registrations.
    pub async fn shutdown(&mut self) -> Option<ConfirmSummary> {
        match self.confirmer.take() {
            Some(confirmer) => Some(confirmer.shutdown().await),
            None => None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &LifecycleState {
        &self.state
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    #[must_use]
    pub const fn chaincode(&self) -> &ChaincodeId {
        &self.chaincode
    }

    #[must_use]
    pub fn current(&self) -> Option<&Deployment> {
        self.history.last()
    }

    #[must_use]
    pub fn history(&self) -> &[Deployment] {
        &self.history
    }

    #[must_use]
    pub fn installed_peers(&self, version: &Version) -> Option<&BTreeSet<PeerId>> {
        self.installed.get(version)
    }

    pub fn client(&self, org: &OrgId) -> Result<&OrgClient, LifecycleError> {
        self.orgs
            .get(org)
            .ok_or_else(|| LifecycleError::UnknownOrg(org.clone()))
    }

    // -------------------------------------------------------------------------
    // Install
    // -------------------------------------------------------------------------

    /// Install `package` as `version` on each org's peers, one dispatch per
    /// org, all orgs concurrently. The first failing org aborts the rest.
    pub async fn install(
        &mut self,
        version: &Version,
        package: Arc<PackageArtifact>,
        targets: &[InstallTarget],
    ) -> Result<Vec<InstallOutcome>, Error> {
        if package.name != self.chaincode {
            return Err(LifecycleError::PackageMismatch {
                expected: self.chaincode.clone(),
                found: package.name.clone(),
            }
            .into());
        }
        if targets.is_empty() {
            return Err(LifecycleError::NoInstallTargets.into());
        }

        // one install per (name, version, peer) in flight
        let mut seen = BTreeSet::new();
        for target in targets {
            for peer in &target.peers {
                if !seen.insert(peer) {
                    return Err(LifecycleError::DuplicateInstallTarget { peer: peer.clone() }.into());
                }
            }
        }

        let request = InstallRequest {
            chaincode: ChaincodeRef::new(self.chaincode.clone(), version.clone()),
            path: self.path.clone(),
            package,
        };

        let jobs = targets
            .iter()
            .map(|target| {
                self.client(&target.org).map(|client| {
                    let op = PeerOperation::Install(request.clone());
                    let peers = Targets::Peers(target.peers.clone());
                    let dispatcher = client.dispatcher();
                    let org = target.org.clone();

                    async move {
                        dispatcher
                            .dispatch(&op, &peers)
                            .await
                            .map(|outcome| InstallOutcome { org, outcome })
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let outcomes = try_join_all(jobs).await?;

        let installed = self.installed.entry(version.clone()).or_default();
        for target in targets {
            installed.extend(target.peers.iter().cloned());
        }
        if self.state == LifecycleState::Unpackaged {
            self.transition(LifecycleState::Installed);
        }

        log!(
            Topic::Lifecycle,
            Ok,
            "installed {}:{version} for {} org(s)",
            self.chaincode,
            outcomes.len()
        );

        Ok(outcomes)
    }

    // -------------------------------------------------------------------------
    // Instantiate / upgrade
    // -------------------------------------------------------------------------

    /// Instantiate or upgrade, whichever brings the channel to `version`.
    pub async fn deploy(
        &mut self,
        org: &OrgId,
        version: &Version,
        spec: &DeploySpec,
        targets: &Targets,
    ) -> Result<DeployStep, Error> {
        match plan_deploy(self.state.active_version(), version) {
            DeployPlan::Instantiate => self.instantiate(org, version, spec, targets).await,
            DeployPlan::Upgrade { .. } => self.upgrade(org, version, spec, targets).await,
            DeployPlan::AlreadyActive => Ok(DeployStep::noop(version.clone())),
        }
    }

    /// Activate `version` on the channel for the first time. Repeating it
    /// for the active version does nothing.
    pub async fn instantiate(
        &mut self,
        org: &OrgId,
        version: &Version,
        spec: &DeploySpec,
        targets: &Targets,
    ) -> Result<DeployStep, Error> {
        match &self.state {
            LifecycleState::Ready(active) if active == version => {
                log!(
                    Topic::Lifecycle,
                    Info,
                    "{}:{version} already instantiated on {}",
                    self.chaincode,
                    self.channel
                );
                return Ok(DeployStep::noop(version.clone()));
            }
            LifecycleState::Unpackaged | LifecycleState::Installed => {}
            other => {
                let active = other.active_version().cloned().unwrap_or_else(|| version.clone());
                return Err(LifecycleError::AlreadyInstantiated {
                    chaincode: self.chaincode.clone(),
                    active,
                }
                .into());
            }
        }
        self.require_installed(version)?;

        let client = self.client(org)?;
        let dispatcher = client.dispatcher();
        let policy = PolicyBuilder::new(client.msp_id().clone()).build(&spec.instantiate_policy)?;

        let request = self.deploy_request(version, spec.init_args.clone(), policy.clone());
        let outcome = dispatcher
            .dispatch(&PeerOperation::Instantiate(request), targets)
            .await?;

        if outcome.is_noop() {
            self.confirm_conflict(org, version).await?;
        }
        self.activate(org, version, policy, targets, &outcome);

        Ok(DeployStep {
            plan: DeployPlan::Instantiate,
            version: version.clone(),
            outcome: Some(outcome),
        })
    }

    /// Move the channel from the active version to `version` under the
    /// upgrade policy. On failure the previous version stays active.
    pub async fn upgrade(
        &mut self,
        org: &OrgId,
        version: &Version,
        spec: &DeploySpec,
        targets: &Targets,
    ) -> Result<DeployStep, Error> {
        let LifecycleState::Ready(active) = &self.state else {
            return Err(self.not_ready("upgrade").into());
        };
        let from = active.clone();

        let plan = plan_deploy(Some(&from), version);
        if plan == DeployPlan::AlreadyActive {
            return Ok(DeployStep::noop(version.clone()));
        }
        self.require_installed(version)?;

        let client = self.client(org)?;
        let dispatcher = client.dispatcher();
        let policy = PolicyBuilder::new(client.msp_id().clone()).build(&spec.upgrade_policy)?;
        let request = self.deploy_request(version, spec.upgrade_args.clone(), policy.clone());

        self.transition(LifecycleState::Upgrading {
            from: from.clone(),
            to: version.clone(),
        });

        let outcome = match dispatcher
            .dispatch(&PeerOperation::Upgrade(request), targets)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.transition(LifecycleState::Ready(from));
                return Err(err.into());
            }
        };

        self.activate(org, version, policy, targets, &outcome);

        Ok(DeployStep {
            plan,
            version: version.clone(),
            outcome: Some(outcome),
        })
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Submit a transaction through `org`. Not retried.
    pub async fn invoke(
        &self,
        org: &OrgId,
        function: &str,
        args: Vec<Vec<u8>>,
        endorsers: &Targets,
    ) -> Result<TransactionRecord, Error> {
        self.require_ready("invoke")?;

        let record = self
            .client(org)?
            .executor(self.chaincode.clone())
            .invoke(function, args, endorsers)
            .await?;

        if let Some(confirmer) = &self.confirmer {
            confirmer.enqueue(record.tx_id.clone()).await?;
        }

        Ok(record)
    }

    /// Read-only evaluation through `org`.
    pub async fn query(
        &self,
        org: &OrgId,
        function: &str,
        args: Vec<Vec<u8>>,
        endorsers: &Targets,
    ) -> Result<Vec<u8>, Error> {
        self.require_ready("query")?;

        let payload = self
            .client(org)?
            .executor(self.chaincode.clone())
            .query(function, args, endorsers)
            .await?;

        Ok(payload)
    }

    // -------------------------------------------------------------------------
    // Sync
    // -------------------------------------------------------------------------

    /// Adopt what the network already has: installed versions on `org`'s
    /// peers and the version active on the channel. Returns the active
    /// version.
    pub async fn sync(&mut self, org: &OrgId) -> Result<Option<Version>, Error> {
        let client = self.client(org)?;
        let session = Arc::clone(client.session());
        let peers = client.peers().clone();

        for peer in &peers {
            let installed = session
                .query_installed(peer)
                .await
                .map_err(ExecutionError::from)?;
            for info in installed.into_iter().filter(|i| i.name == self.chaincode) {
                self.installed
                    .entry(info.version)
                    .or_default()
                    .insert(peer.clone());
            }
        }

        let active = self.active_on_network(org).await?;

        match &active {
            Some(version) if self.state != LifecycleState::Ready(version.clone()) => {
                self.adopt(org, version);
            }
            None if self.state == LifecycleState::Unpackaged && !self.installed.is_empty() => {
                self.transition(LifecycleState::Installed);
            }
            _ => {}
        }

        Ok(active)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn active_on_network(&self, org: &OrgId) -> Result<Option<Version>, Error> {
        let active = self
            .client(org)?
            .session()
            .query_instantiated()
            .await
            .map_err(ExecutionError::from)?
            .into_iter()
            .find(|info| info.name == self.chaincode)
            .map(|info| info.version);

        Ok(active)
    }

    // An "already exists" reply names no version; only the channel's active
    // version may be adopted.
    async fn confirm_conflict(&mut self, org: &OrgId, version: &Version) -> Result<(), Error> {
        match self.active_on_network(org).await? {
            Some(active) if &active == version => Ok(()),
            Some(active) => {
                log!(
                    Topic::Lifecycle,
                    Warn,
                    "{}:{version} requested but {active} is active on {}",
                    self.chaincode,
                    self.channel
                );
                self.adopt(org, &active);

                Err(LifecycleError::AlreadyInstantiated {
                    chaincode: self.chaincode.clone(),
                    active,
                }
                .into())
            }
            None => Err(LifecycleError::NoActiveVersion {
                chaincode: self.chaincode.clone(),
            }
            .into()),
        }
    }

    // Record a version found on the network without deploying it.
    fn adopt(&mut self, org: &OrgId, version: &Version) {
        let sequence = self.history.last().map_or(1, |d| d.sequence + 1);
        self.history.push(Deployment {
            chaincode: self.chaincode.clone(),
            path: self.path.clone(),
            version: version.clone(),
            sequence,
            policy: None,
            orgs: BTreeSet::from([org.clone()]),
            peers: BTreeSet::new(),
            tx_id: None,
        });
        self.transition(LifecycleState::Ready(version.clone()));
    }

    fn deploy_request(
        &self,
        version: &Version,
        args: Vec<Vec<u8>>,
        policy: SignaturePolicyEnvelope,
    ) -> DeployRequest {
        DeployRequest {
            chaincode: ChaincodeRef::new(self.chaincode.clone(), version.clone()),
            path: self.path.clone(),
            args,
            policy,
        }
    }

    fn activate(
        &mut self,
        org: &OrgId,
        version: &Version,
        policy: SignaturePolicyEnvelope,
        targets: &Targets,
        outcome: &DispatchOutcome,
    ) {
        let sequence = self.history.last().map_or(1, |d| d.sequence + 1);
        let orgs = policy
            .msp_ids()
            .iter()
            .filter_map(|msp| self.org_for_msp(msp))
            .chain([org.clone()])
            .collect();

        self.history.push(Deployment {
            chaincode: self.chaincode.clone(),
            path: self.path.clone(),
            version: version.clone(),
            sequence,
            orgs,
            policy: Some(policy),
            peers: targets.explicit().cloned().unwrap_or_default(),
            tx_id: outcome.tx_id.clone(),
        });

        if outcome.is_noop() {
            log!(
                Topic::Lifecycle,
                Info,
                "{}:{version} already exists on {}; adopting it",
                self.chaincode,
                self.channel
            );
        }

        self.transition(LifecycleState::Instantiated(version.clone()));
        self.transition(LifecycleState::Ready(version.clone()));
    }

    fn org_for_msp(&self, msp: &MspId) -> Option<OrgId> {
        self.orgs
            .values()
            .find(|client| client.msp_id() == msp)
            .map(|client| client.org().clone())
    }

    fn require_installed(&self, version: &Version) -> Result<(), LifecycleError> {
        if self.installed.get(version).is_some_and(|peers| !peers.is_empty()) {
            Ok(())
        } else {
            Err(LifecycleError::NotInstalled {
                chaincode: self.chaincode.clone(),
                version: version.clone(),
            })
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Ready(_) => Ok(()),
            _ => Err(self.not_ready(operation)),
        }
    }

    fn not_ready(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::NotReady {
            operation,
            chaincode: self.chaincode.clone(),
            state: self.state.clone(),
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        log!(
            Topic::Lifecycle,
            Debug,
            "{} on {}: {} -> {next}",
            self.chaincode,
            self.channel,
            self.state
        );
        self.state = next;
    }
}

///
/// TESTS
///
