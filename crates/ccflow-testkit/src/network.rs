use crate::{
    chaincode::{Chaincode, KvStore},
    ledger::{Ledger, PeerState},
    session::SimSession,
};
use ccflow_core::{
    config::DeploymentConfig,
    ids::{ChaincodeId, ChannelId, MspId, OrgId, PeerId, Version},
    ops::session::SessionContext,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error as ThisError;

/// Default capacity of the simulated block stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

///
/// SimError
/// Session setup failures; operations themselves report `TransportError`.
///

#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum SimError {
    #[error("session for org '{org}' targets channel '{found}', network serves '{expected}'")]
    ChannelMismatch {
        org: OrgId,
        expected: ChannelId,
        found: ChannelId,
    },

    #[error("org '{org}' is registered as '{expected}', session claims '{found}'")]
    MspMismatch {
        org: OrgId,
        expected: MspId,
        found: MspId,
    },

    #[error("unknown org '{0}'")]
    UnknownOrg(OrgId),
}

///
/// SimOrg
///

#[derive(Clone, Debug)]
pub struct SimOrg {
    pub name: OrgId,
    pub msp_id: MspId,
    pub peers: Vec<PeerId>,
}

///
/// SimNetworkBuilder
///

pub struct SimNetworkBuilder {
    channel: ChannelId,
    orgs: Vec<SimOrg>,
    registry: BTreeMap<String, Arc<dyn Chaincode>>,
    stream_capacity: usize,
}

impl SimNetworkBuilder {
    #[must_use]
    pub fn org<I, P>(mut self, name: impl Into<OrgId>, msp_id: impl Into<MspId>, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        self.orgs.push(SimOrg {
            name: name.into(),
            msp_id: msp_id.into(),
            peers: peers.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Register the deployable unit served for packages built from `path`.
    #[must_use]
    pub fn chaincode(mut self, path: impl Into<String>, chaincode: impl Chaincode + 'static) -> Self {
        self.registry.insert(path.into(), Arc::new(chaincode));
        self
    }

    #[must_use]
    pub const fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    #[must_use]
    pub fn build(self) -> SimNetwork {
        let peers = self
            .orgs
            .iter()
            .flat_map(|org| {
                org.peers.iter().map(|peer| {
                    (
                        peer.clone(),
                        PeerState {
                            org: org.name.clone(),
                            msp_id: org.msp_id.clone(),
                            up: true,
                            installed: BTreeMap::new(),
                        },
                    )
                })
            })
            .collect();

        let ledger = Ledger::new(
            self.channel.clone(),
            peers,
            self.registry,
            self.stream_capacity,
        );

        SimNetwork {
            channel: self.channel,
            orgs: self.orgs.into(),
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }
}

///
/// SimNetwork
///
/// In-process stand-in for a channel: peers grouped by organization, an
/// ordering step that validates endorsements against the active policy,
/// and a committed block stream. Clones share the same ledger.
///

#[derive(Clone)]
pub struct SimNetwork {
    channel: ChannelId,
    orgs: Arc<[SimOrg]>,
    ledger: Arc<Mutex<Ledger>>,
}

impl SimNetwork {
    #[must_use]
    pub fn builder(channel: impl Into<ChannelId>) -> SimNetworkBuilder {
        SimNetworkBuilder {
            channel: channel.into(),
            orgs: Vec::new(),
            registry: BTreeMap::new(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Network matching a deployment config, serving the key-value store at
    /// the configured chaincode path.
    #[must_use]
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let builder = config.orgs.iter().fold(
            Self::builder(config.channel.clone()),
            |builder, org| builder.org(org.name.clone(), org.msp_id.clone(), org.peers.clone()),
        );

        builder
            .chaincode(config.chaincode.path.clone(), KvStore)
            .stream_capacity(config.events.stream_capacity)
            .build()
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    #[must_use]
    pub fn orgs(&self) -> &[SimOrg] {
        &self.orgs
    }

    #[must_use]
    pub fn org(&self, name: &OrgId) -> Option<&SimOrg> {
        self.orgs.iter().find(|org| &org.name == name)
    }

    /// Open a session acting as `ctx`.
    pub fn connect(&self, ctx: SessionContext) -> Result<SimSession, SimError> {
        let org = self
            .org(&ctx.org)
            .ok_or_else(|| SimError::UnknownOrg(ctx.org.clone()))?;

        if ctx.channel != self.channel {
            return Err(SimError::ChannelMismatch {
                org: ctx.org,
                expected: self.channel.clone(),
                found: ctx.channel,
            });
        }
        if ctx.msp_id != org.msp_id {
            return Err(SimError::MspMismatch {
                org: ctx.org,
                expected: org.msp_id.clone(),
                found: ctx.msp_id,
            });
        }

        Ok(SimSession::new(ctx, self.clone()))
    }

    /// Session for `org` as `Admin` / `User1`.
    pub fn session(&self, org: &OrgId) -> Result<SimSession, SimError> {
        let msp_id = self
            .org(org)
            .map(|o| o.msp_id.clone())
            .ok_or_else(|| SimError::UnknownOrg(org.clone()))?;

        self.connect(SessionContext {
            org: org.clone(),
            msp_id,
            admin: "Admin".to_string(),
            user: "User1".to_string(),
            channel: self.channel.clone(),
        })
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// A down peer answers every call with status 503.
    pub fn set_peer_up(&self, peer: &PeerId, up: bool) -> bool {
        self.ledger()
            .peers
            .get_mut(peer)
            .map(|state| state.up = up)
            .is_some()
    }

    /// While disconnected every session call fails with a transport error.
    pub fn set_connected(&self, connected: bool) {
        self.ledger().connected = connected;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// How many times Init has run for `chaincode`, across all versions.
    #[must_use]
    pub fn init_count(&self, chaincode: &ChaincodeId) -> u64 {
        self.ledger().init_count(chaincode)
    }

    /// Committed blocks, genesis included.
    #[must_use]
    pub fn block_height(&self) -> usize {
        self.ledger().height()
    }

    #[must_use]
    pub fn state(&self, chaincode: &ChaincodeId, key: &str) -> Option<Vec<u8>> {
        self.ledger().state(chaincode, key)
    }

    #[must_use]
    pub fn active_version(&self, chaincode: &ChaincodeId) -> Option<Version> {
        self.ledger().active_version(chaincode)
    }

    #[must_use]
    pub fn installed_on(&self, peer: &PeerId) -> Vec<String> {
        self.ledger()
            .peers
            .get(peer)
            .map(|state| state.installed.keys().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub(crate) fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

///
/// TESTS
///
