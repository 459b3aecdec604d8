#![allow(dead_code)]

use ccflow_core::prelude::*;
use ccflow_testkit::{
    SimNetwork,
    fixture::{self, PEER0_ORG1, PEER0_ORG2, PEER1_ORG1},
};
use std::sync::Arc;
use tempfile::TempDir;

pub const OR_POLICY: &str = "OR('Org1MSP.member','Org2MSP.member')";
pub const AND_POLICY: &str = "AND('Org1MSP.member','Org2MSP.member')";

///
/// Harness
/// Sample network, a coordinator over both orgs and a packaged source tree.
///

pub struct Harness {
    pub network: SimNetwork,
    pub coordinator: LifecycleCoordinator,
    pub package: Arc<PackageArtifact>,
    _build_root: TempDir,
}

pub fn harness() -> Harness {
    let network = fixture::sample_network();
    let coordinator = coordinator(&network);

    let build_root = tempfile::tempdir().unwrap();
    let package = Arc::new(fixture::kv_package(build_root.path()).unwrap());

    Harness {
        network,
        coordinator,
        package,
        _build_root: build_root,
    }
}

/// Harness whose coordinator forwards every invoke to a confirmer.
pub async fn harness_with_confirmer() -> Harness {
    let mut h = harness();
    let session = h.network.session(&fixture::org1()).unwrap();
    let events = EventService::connect(&session, EventSettings::default())
        .await
        .unwrap();

    let coordinator = std::mem::replace(&mut h.coordinator, coordinator(&h.network));
    h.coordinator = coordinator.with_confirmer(TxConfirmer::spawn(events, 16));

    h
}

pub fn coordinator(network: &SimNetwork) -> LifecycleCoordinator {
    let mut coordinator = LifecycleCoordinator::new(
        ChannelId::new(fixture::CHANNEL),
        fixture::chaincode(),
        fixture::CHAINCODE_PATH,
    );

    coordinator
        .add_org(org_client(
            network,
            &fixture::org1(),
            &[PEER0_ORG1, PEER1_ORG1],
        ))
        .unwrap();
    coordinator
        .add_org(org_client(network, &fixture::org2(), &[PEER0_ORG2]))
        .unwrap();

    coordinator
}

pub fn org_client(network: &SimNetwork, org: &OrgId, peers: &[&'static str]) -> OrgClient {
    let session: Arc<dyn Session> = Arc::new(network.session(org).unwrap());

    OrgClient::new(session, peers.iter().copied().map(PeerId::new))
}

pub fn peers(names: &[&'static str]) -> Targets {
    Targets::peers(names.iter().copied())
}

pub fn v(label: &'static str) -> Version {
    Version::new(label)
}

pub fn install_targets(org1: &[&'static str], org2: &[&'static str]) -> Vec<InstallTarget> {
    let mut targets = Vec::new();
    if !org1.is_empty() {
        targets.push(InstallTarget::new(fixture::org1(), org1.iter().copied()));
    }
    if !org2.is_empty() {
        targets.push(InstallTarget::new(fixture::org2(), org2.iter().copied()));
    }

    targets
}

/// Install `version` on peer0 of both orgs, then instantiate through Org1.
pub async fn instantiate(h: &mut Harness, version: &'static str, policy: &str) {
    h.coordinator
        .install(
            &v(version),
            Arc::clone(&h.package),
            &install_targets(&[PEER0_ORG1], &[PEER0_ORG2]),
        )
        .await
        .unwrap();

    h.coordinator
        .instantiate(
            &fixture::org1(),
            &v(version),
            &DeploySpec::new(policy, policy),
            &peers(&[PEER0_ORG1]),
        )
        .await
        .unwrap();
}
