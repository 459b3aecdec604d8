//! Two-org sample topology and an on-disk key-value source tree.

use crate::{chaincode::KvStore, network::SimNetwork};
use ccflow_core::{
    ids::{ChaincodeId, ChannelId, OrgId, PeerId},
    ops::package::{PackageArtifact, PackageError, PackageSource, Packager},
};
use std::{fs, io, path::Path};

pub const CHANNEL: &str = "mychannel";
pub const CHAINCODE: &str = "mycc";
pub const CHAINCODE_PATH: &str = "github.com/example/kvstore";

pub const ORG1: &str = "Org1";
pub const ORG1_MSP: &str = "Org1MSP";
pub const ORG2: &str = "Org2";
pub const ORG2_MSP: &str = "Org2MSP";

pub const PEER0_ORG1: &str = "peer0.org1.example.com";
pub const PEER1_ORG1: &str = "peer1.org1.example.com";
pub const PEER0_ORG2: &str = "peer0.org2.example.com";

const KV_SOURCE: &str = "package main\n\n// KVStore: set(key, value), get(key)\ntype KVStore struct{}\n";

/// Org1 with two peers, Org2 with one, `KvStore` served at
/// [`CHAINCODE_PATH`].
#[must_use]
pub fn sample_network() -> SimNetwork {
    SimNetwork::builder(ChannelId::new(CHANNEL))
        .org(ORG1, ORG1_MSP, [PEER0_ORG1, PEER1_ORG1])
        .org(ORG2, ORG2_MSP, [PEER0_ORG2])
        .chaincode(CHAINCODE_PATH, KvStore)
        .build()
}

#[must_use]
pub const fn org1() -> OrgId {
    OrgId::new(ORG1)
}

#[must_use]
pub const fn org2() -> OrgId {
    OrgId::new(ORG2)
}

#[must_use]
pub const fn chaincode() -> ChaincodeId {
    ChaincodeId::new(CHAINCODE)
}

#[must_use]
pub const fn peer(name: &'static str) -> PeerId {
    PeerId::new(name)
}

/// Lay out `<build_root>/src/<path>/kvstore.go`.
pub fn write_kv_source(build_root: &Path, path: &str) -> io::Result<()> {
    let dir = build_root.join("src").join(path);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("kvstore.go"), KV_SOURCE)
}

/// Write the sample source under `build_root` and package it.
pub fn kv_package(build_root: &Path) -> Result<PackageArtifact, PackageError> {
    write_kv_source(build_root, CHAINCODE_PATH).map_err(|source| PackageError::Io {
        path: build_root.to_path_buf(),
        source,
    })?;

    Packager::package(&PackageSource::new(chaincode(), CHAINCODE_PATH, build_root))
}
