//! Simulated network and deployable units for exercising ccflow.
//!
//! [`SimNetwork`] implements the session boundary in-process: peers grouped
//! by organization, per-peer installs, channel-wide instantiate and upgrade,
//! endorsement by simulation, ordering that validates endorsements against
//! the active policy, and a committed block stream. Failure injection
//! covers downed peers and a lost connection.

pub mod chaincode;
pub mod fixture;
mod ledger;
pub mod network;
pub mod session;

pub use chaincode::{Chaincode, ChaincodeError, KvFunction, KvStore, Stub};
pub use network::{SimError, SimNetwork, SimNetworkBuilder, SimOrg};
pub use session::SimSession;
