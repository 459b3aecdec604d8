use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

///
/// ChaincodeId
/// Deployment name of a chaincode; stable across versions.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ChaincodeId(pub Cow<'static, str>);

string_id!(ChaincodeId);

///
/// Version
///
/// Opaque version label ("v1", "v2", ...). Ordering between labels is not
/// inferred from the string; the lifecycle coordinator tracks advancement
/// with an explicit sequence number instead.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Version(pub Cow<'static, str>);

string_id!(Version);

///
/// ChaincodeRef
/// Name + version pair addressing one installable package.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[display("{name}:{version}")]
pub struct ChaincodeRef {
    pub name: ChaincodeId,
    pub version: Version,
}

impl ChaincodeRef {
    #[must_use]
    pub const fn new(name: ChaincodeId, version: Version) -> Self {
        Self { name, version }
    }
}
