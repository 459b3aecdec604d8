// Simulated channel state:
// - one ledger per network, guarded by the network's mutex
// - every operation is synchronous; callers never hold the lock across .await
// - committed blocks are broadcast under the lock so delivery order matches
//   block order

use crate::chaincode::{Chaincode, Effects, Stub};
use ccflow_core::{
    domain::policy::{
        deploy::DeployMode,
        endorsement::{MspRole, SignaturePolicyEnvelope, Signer},
    },
    ids::{ChaincodeId, ChaincodeRef, ChannelId, MspId, OrgId, PeerId, TxId, Version},
    ops::session::{
        Block, BlockTransaction, ChaincodeEventRecord, ChaincodeInfo, DeliveredBlock,
        DeployRequest, DeployResponse, Endorsement, InstallRequest, PeerResponse, Proposal,
        STATUS_OK, SessionContext, Targets, TransportError, ValidationCode,
    },
};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::broadcast;

pub(crate) const STATUS_FORBIDDEN: u16 = 403;
pub(crate) const STATUS_INTERNAL: u16 = 500;
pub(crate) const STATUS_UNAVAILABLE: u16 = 503;

type WorldState = BTreeMap<String, Vec<u8>>;

///
/// PeerState
///

pub(crate) struct PeerState {
    pub org: OrgId,
    pub msp_id: MspId,
    pub up: bool,
    pub installed: BTreeMap<ChaincodeRef, String>,
}

impl PeerState {
    fn signer(&self) -> Signer {
        Signer::new(self.msp_id.clone(), MspRole::Peer)
    }
}

///
/// ActiveChaincode
///

struct ActiveChaincode {
    version: Version,
    path: String,
    policy: SignaturePolicyEnvelope,
    instance: Arc<dyn Chaincode>,
}

///
/// Simulation
/// Effects recorded at endorsement, applied only if the tx commits valid.
///

struct Simulation {
    chaincode: ChaincodeId,
    effects: Effects,
}

///
/// Ledger
///

pub(crate) struct Ledger {
    pub channel: ChannelId,
    pub peers: BTreeMap<PeerId, PeerState>,
    pub connected: bool,
    registry: BTreeMap<String, Arc<dyn Chaincode>>,
    active: BTreeMap<ChaincodeId, ActiveChaincode>,
    world: BTreeMap<ChaincodeId, WorldState>,
    blocks: Vec<Arc<Block>>,
    committed: HashSet<TxId>,
    simulations: HashMap<TxId, Simulation>,
    inits: BTreeMap<ChaincodeId, u64>,
    stream: broadcast::Sender<DeliveredBlock>,
    source: String,
}

impl Ledger {
    pub fn new(
        channel: ChannelId,
        peers: BTreeMap<PeerId, PeerState>,
        registry: BTreeMap<String, Arc<dyn Chaincode>>,
        stream_capacity: usize,
    ) -> Self {
        let (stream, _) = broadcast::channel(stream_capacity.max(1));
        let source = peers
            .keys()
            .next()
            .map_or_else(|| "orderer".to_string(), ToString::to_string);

        let genesis = Block {
            number: 0,
            data_hash: data_hash(&[]),
            previous_hash: Vec::new(),
            transactions: Vec::new(),
        };

        Self {
            channel,
            peers,
            connected: true,
            registry,
            active: BTreeMap::new(),
            world: BTreeMap::new(),
            blocks: vec![Arc::new(genesis)],
            committed: HashSet::new(),
            simulations: HashMap::new(),
            inits: BTreeMap::new(),
            stream,
            source,
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn init_count(&self, chaincode: &ChaincodeId) -> u64 {
        self.inits.get(chaincode).copied().unwrap_or_default()
    }

    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn state(&self, chaincode: &ChaincodeId, key: &str) -> Option<Vec<u8>> {
        self.world.get(chaincode)?.get(key).cloned()
    }

    pub fn active_version(&self, chaincode: &ChaincodeId) -> Option<Version> {
        self.active.get(chaincode).map(|a| a.version.clone())
    }

    // -------------------------------------------------------------------------
    // Session operations
    // -------------------------------------------------------------------------

    pub fn install(
        &mut self,
        ctx: &SessionContext,
        request: &InstallRequest,
        targets: &BTreeSet<PeerId>,
    ) -> Result<Vec<PeerResponse>, TransportError> {
        self.ensure_connected("install")?;
        for target in targets {
            self.peer(target)?;
        }

        let registered = self.registry.contains_key(&request.path);
        let mut responses = Vec::with_capacity(targets.len());

        for target in targets {
            let Some(peer) = self.peers.get_mut(target) else {
                continue;
            };

            let response = if peer.org != ctx.org {
                PeerResponse::error(
                    target.clone(),
                    STATUS_FORBIDDEN,
                    format!("access denied: {} is not an admin of {target}", ctx.msp_id),
                )
            } else if !peer.up {
                unavailable(target)
            } else if peer.installed.contains_key(&request.chaincode) {
                PeerResponse::error(
                    target.clone(),
                    STATUS_INTERNAL,
                    format!("chaincode {} already installed on {target}", request.chaincode),
                )
            } else if !registered {
                PeerResponse::error(
                    target.clone(),
                    STATUS_INTERNAL,
                    format!("no deployable unit at path '{}'", request.path),
                )
            } else {
                peer.installed
                    .insert(request.chaincode.clone(), request.path.clone());
                PeerResponse::ok(target.clone(), "install success")
            };

            responses.push(response);
        }

        Ok(responses)
    }

    pub fn deploy(
        &mut self,
        ctx: &SessionContext,
        mode: DeployMode,
        request: &DeployRequest,
        targets: &Targets,
    ) -> Result<DeployResponse, TransportError> {
        self.ensure_connected("deploy")?;

        let chaincode = &request.chaincode;
        let name = &chaincode.name;
        let peers = self.deploy_peers(ctx, chaincode, targets)?;

        let conflict = match (mode, self.active.get(name)) {
            (DeployMode::Instantiate, Some(_)) => {
                Some(format!("chaincode with name '{name}' already exists"))
            }
            (DeployMode::Upgrade, None) => Some(format!(
                "chaincode '{name}' is not instantiated on channel '{}'",
                self.channel
            )),
            (DeployMode::Upgrade, Some(active)) if active.version == chaincode.version => Some(
                format!("version '{}' already exists for chaincode '{name}'", chaincode.version),
            ),
            _ => None,
        };

        let mut responses: Vec<PeerResponse> = peers
            .iter()
            .map(|id| match self.peers.get(id) {
                Some(peer) if !peer.up => unavailable(id),
                Some(peer) if !peer.installed.contains_key(chaincode) => PeerResponse::error(
                    id.clone(),
                    STATUS_INTERNAL,
                    format!("chaincode {chaincode} not installed on {id}"),
                ),
                Some(_) => match &conflict {
                    Some(message) => PeerResponse::error(id.clone(), STATUS_INTERNAL, message),
                    None => PeerResponse::ok(id.clone(), "deploy endorsed"),
                },
                None => PeerResponse::error(id.clone(), STATUS_INTERNAL, "unknown peer"),
            })
            .collect();

        if !responses.iter().any(|r| r.status == STATUS_OK) {
            return Ok(DeployResponse {
                tx_id: None,
                responses,
            });
        }

        let Some(instance) = self.registry.get(&request.path).cloned() else {
            reject_accepted(
                &mut responses,
                &format!("no deployable unit at path '{}'", request.path),
            );
            return Ok(DeployResponse {
                tx_id: None,
                responses,
            });
        };

        // Init runs once, at commit
        let empty = WorldState::new();
        let init = {
            let mut stub = Stub::new(self.world.get(name).unwrap_or(&empty));
            instance
                .init(&mut stub, &request.args)
                .map(|_| stub.into_effects())
        };
        let effects = match init {
            Ok(effects) => effects,
            Err(err) => {
                reject_accepted(&mut responses, &format!("init failed: {err}"));
                return Ok(DeployResponse {
                    tx_id: None,
                    responses,
                });
            }
        };

        self.world
            .entry(name.clone())
            .or_default()
            .extend(effects.writes);
        self.active.insert(
            name.clone(),
            ActiveChaincode {
                version: chaincode.version.clone(),
                path: request.path.clone(),
                policy: request.policy.clone(),
                instance,
            },
        );
        *self.inits.entry(name.clone()).or_default() += 1;

        let tx_id = TxId::generate(&ctx.creator());
        self.committed.insert(tx_id.clone());
        self.append_block(vec![BlockTransaction {
            tx_id: tx_id.clone(),
            validation_code: ValidationCode::Valid,
            chaincode_event: None,
        }]);

        tracing::debug!(%chaincode, ?mode, "sim: deploy committed");

        Ok(DeployResponse {
            tx_id: Some(tx_id),
            responses,
        })
    }

    pub fn endorse(
        &mut self,
        ctx: &SessionContext,
        proposal: &Proposal,
        endorsers: &Targets,
    ) -> Result<Vec<Endorsement>, TransportError> {
        self.ensure_connected("endorse")?;

        let peers = match endorsers {
            Targets::Peers(peers) => {
                for peer in peers {
                    self.peer(peer)?;
                }
                peers.iter().cloned().collect()
            }
            Targets::NetworkDefault => self.default_endorsers(ctx, &proposal.chaincode),
        };

        let name = &proposal.chaincode;
        let empty = WorldState::new();
        let committed = self.world.get(name).unwrap_or(&empty);
        let active = self.active.get(name);

        let mut endorsements = Vec::with_capacity(peers.len());
        let mut simulated = None;

        for id in &peers {
            let Some(peer) = self.peers.get(id) else {
                continue;
            };
            let endorsement = |status: u16, message: String, payload: Vec<u8>| Endorsement {
                peer: id.clone(),
                signer: peer.signer(),
                status,
                message,
                payload,
            };

            let Some(active) = active else {
                endorsements.push(endorsement(
                    STATUS_INTERNAL,
                    format!("chaincode '{name}' is not instantiated on channel '{}'", self.channel),
                    Vec::new(),
                ));
                continue;
            };

            let reference = ChaincodeRef::new(name.clone(), active.version.clone());
            if !peer.up {
                endorsements.push(endorsement(
                    STATUS_UNAVAILABLE,
                    "peer unavailable".to_string(),
                    Vec::new(),
                ));
            } else if !peer.installed.contains_key(&reference) {
                endorsements.push(endorsement(
                    STATUS_INTERNAL,
                    format!("chaincode {reference} not installed on {id}"),
                    Vec::new(),
                ));
            } else {
                let mut stub = Stub::new(committed);
                match active
                    .instance
                    .invoke(&mut stub, &proposal.function, &proposal.args)
                {
                    Ok(payload) => {
                        simulated = Some(stub.into_effects());
                        endorsements.push(endorsement(STATUS_OK, "success".to_string(), payload));
                    }
                    Err(err) => {
                        endorsements.push(endorsement(STATUS_INTERNAL, err.to_string(), Vec::new()));
                    }
                }
            }
        }

        if let Some(effects) = simulated.filter(|e| !e.writes.is_empty() || e.event.is_some()) {
            self.simulations.insert(
                proposal.tx_id.clone(),
                Simulation {
                    chaincode: name.clone(),
                    effects,
                },
            );
        }

        Ok(endorsements)
    }

    pub fn submit(
        &mut self,
        proposal: &Proposal,
        endorsements: &[Endorsement],
    ) -> Result<(), TransportError> {
        self.ensure_connected("orderer")?;

        let tx_id = &proposal.tx_id;
        let code = if self.committed.contains(tx_id) {
            ValidationCode::DuplicateTxId
        } else {
            match self.active.get(&proposal.chaincode) {
                None => ValidationCode::InvalidOtherReason,
                Some(active) => {
                    let signers: Vec<Signer> = endorsements
                        .iter()
                        .filter(|e| e.is_success())
                        .map(|e| e.signer.clone())
                        .collect();

                    if active.policy.is_satisfied_by(&signers) {
                        ValidationCode::Valid
                    } else {
                        ValidationCode::EndorsementPolicyFailure
                    }
                }
            }
        };

        let mut chaincode_event = None;
        if code != ValidationCode::DuplicateTxId {
            let simulation = self.simulations.remove(tx_id);
            self.committed.insert(tx_id.clone());

            if code.is_valid()
                && let Some(Simulation { chaincode, effects }) = simulation
            {
                self.world
                    .entry(chaincode.clone())
                    .or_default()
                    .extend(effects.writes);
                chaincode_event = effects.event.map(|(event_name, payload)| ChaincodeEventRecord {
                    chaincode_id: chaincode,
                    event_name,
                    payload,
                });
            }
        }

        tracing::debug!(tx = %tx_id, %code, "sim: transaction ordered");

        self.append_block(vec![BlockTransaction {
            tx_id: tx_id.clone(),
            validation_code: code,
            chaincode_event,
        }]);

        Ok(())
    }

    pub fn query_installed(&self, peer: &PeerId) -> Result<Vec<ChaincodeInfo>, TransportError> {
        self.ensure_connected("lscc")?;

        let state = self.peer(peer)?;
        if !state.up {
            return Err(TransportError::no_response(peer.as_str(), "peer unavailable"));
        }

        Ok(state
            .installed
            .iter()
            .map(|(reference, path)| ChaincodeInfo {
                name: reference.name.clone(),
                version: reference.version.clone(),
                path: path.clone(),
            })
            .collect())
    }

    pub fn query_instantiated(&self) -> Result<Vec<ChaincodeInfo>, TransportError> {
        self.ensure_connected("lscc")?;

        Ok(self
            .active
            .iter()
            .map(|(name, active)| ChaincodeInfo {
                name: name.clone(),
                version: active.version.clone(),
                path: active.path.clone(),
            })
            .collect())
    }

    pub fn deliver(&self) -> Result<broadcast::Receiver<DeliveredBlock>, TransportError> {
        self.ensure_connected("deliver")?;

        Ok(self.stream.subscribe())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn ensure_connected(&self, endpoint: &str) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::no_response(endpoint, "connection refused"))
        }
    }

    fn peer(&self, id: &PeerId) -> Result<&PeerState, TransportError> {
        self.peers
            .get(id)
            .ok_or_else(|| TransportError::UnknownEndpoint(id.to_string()))
    }

    // NetworkDefault: the session org's peers holding the package, else all of them
    fn deploy_peers(
        &self,
        ctx: &SessionContext,
        chaincode: &ChaincodeRef,
        targets: &Targets,
    ) -> Result<Vec<PeerId>, TransportError> {
        match targets {
            Targets::Peers(peers) => {
                for peer in peers {
                    self.peer(peer)?;
                }
                Ok(peers.iter().cloned().collect())
            }
            Targets::NetworkDefault => {
                let own: Vec<(&PeerId, &PeerState)> = self
                    .peers
                    .iter()
                    .filter(|(_, p)| p.org == ctx.org)
                    .collect();
                let holding: Vec<PeerId> = own
                    .iter()
                    .filter(|(_, p)| p.up && p.installed.contains_key(chaincode))
                    .map(|(id, _)| (*id).clone())
                    .collect();

                if holding.is_empty() {
                    Ok(own.into_iter().map(|(id, _)| id.clone()).collect())
                } else {
                    Ok(holding)
                }
            }
        }
    }

    // NetworkDefault: one ready peer for each MSP the active policy names
    fn default_endorsers(&self, ctx: &SessionContext, chaincode: &ChaincodeId) -> Vec<PeerId> {
        let Some(active) = self.active.get(chaincode) else {
            return self
                .peers
                .iter()
                .find(|(_, p)| p.org == ctx.org)
                .map(|(id, _)| vec![id.clone()])
                .unwrap_or_default();
        };
        let reference = ChaincodeRef::new(chaincode.clone(), active.version.clone());

        active
            .policy
            .msp_ids()
            .iter()
            .filter_map(|msp| {
                self.peers
                    .iter()
                    .find(|(_, p)| &p.msp_id == msp && p.up && p.installed.contains_key(&reference))
                    .map(|(id, _)| id.clone())
            })
            .collect()
    }

    fn append_block(&mut self, transactions: Vec<BlockTransaction>) {
        let (number, previous_hash) = self
            .blocks
            .last()
            .map_or((0, Vec::new()), |b| (b.number + 1, header_hash(b)));

        let block = Arc::new(Block {
            number,
            data_hash: data_hash(&transactions),
            previous_hash,
            transactions,
        });
        self.blocks.push(Arc::clone(&block));

        let delivered = DeliveredBlock {
            block,
            source: self.source.clone(),
        };
        if self.stream.send(delivered).is_err() {
            tracing::trace!(number, "sim: block committed with no listeners");
        }
    }
}

fn unavailable(peer: &PeerId) -> PeerResponse {
    PeerResponse::error(peer.clone(), STATUS_UNAVAILABLE, "peer unavailable")
}

fn reject_accepted(responses: &mut [PeerResponse], message: &str) {
    for response in responses.iter_mut().filter(|r| r.status == STATUS_OK) {
        response.status = STATUS_INTERNAL;
        response.message = message.to_string();
    }
}

fn data_hash(transactions: &[BlockTransaction]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for tx in transactions {
        hasher.update(tx.tx_id.as_str().as_bytes());
        hasher.update(tx.validation_code.to_string().as_bytes());
    }

    hasher.finalize().to_vec()
}

fn header_hash(block: &Block) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(block.number.to_be_bytes());
    hasher.update(&block.previous_hash);
    hasher.update(&block.data_hash);

    hasher.finalize().to_vec()
}
