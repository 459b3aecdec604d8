use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

///
/// ChannelId
/// Logical ledger scope shared by a subset of network participants.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ChannelId(pub Cow<'static, str>);

string_id!(ChannelId);

///
/// OrgId
/// Human-facing organization name (e.g. "Org1").
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OrgId(pub Cow<'static, str>);

string_id!(OrgId);

///
/// MspId
///
/// Membership service provider identifier (e.g. "Org1MSP"). Endorsement
/// policies are expressed over MSP ids, not organization names.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MspId(pub Cow<'static, str>);

string_id!(MspId);

///
/// PeerId
/// Peer endpoint name as known to the network (e.g. "peer0.org1.example.com").
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PeerId(pub Cow<'static, str>);

string_id!(PeerId);
