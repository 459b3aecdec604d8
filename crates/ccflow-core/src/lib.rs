//! Client-side chaincode lifecycle orchestration.
//!
//! Drives a deployable unit ("chaincode") across a multi-organization
//! permissioned ledger network: package, install on peers, instantiate or
//! upgrade under an endorsement policy, invoke, query, and observe channel
//! events.
//!
//! ## Layering
//!
//! - `domain/` owns deterministic decision rules (policies, idempotency,
//!   deploy planning). No I/O.
//! - `ops/` provides mechanical side-effecting operations against the
//!   network session boundary and the local filesystem.
//! - `workflow/` sequences ops into the lifecycle and tracks commits.
//! - `config/` parses and validates deployment configuration.
//!
//! The default flow is: caller → workflow → domain → ops → session.
//!
//! The network itself sits behind [`ops::session::Session`]; callers supply
//! one authenticated session per organization.

pub mod config;
pub mod domain;
pub mod error;
pub mod ids;
pub mod log;
pub mod ops;
pub mod workflow;

pub use error::{Error, ErrorClass};

pub(crate) use thiserror::Error as ThisError;

///
/// Crate Version
///

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for consumers driving a deployment.
pub mod prelude {
    pub use crate::{
        Error, ErrorClass,
        config::{DeploymentConfig, Validate},
        domain::policy::endorsement::{PolicyBuilder, SignaturePolicyEnvelope, Signer},
        ids::{ChaincodeId, ChannelId, MspId, OrgId, PeerId, TxId, Version},
        ops::{
            event::{EventService, EventSettings},
            execute::to_args,
            package::{PackageArtifact, PackageSource, Packager},
            session::{Session, SessionContext, Targets},
        },
        workflow::{
            confirm::TxConfirmer,
            lifecycle::{DeploySpec, InstallTarget, LifecycleCoordinator, LifecycleState, OrgClient},
            phase::{PhaseCall, PhasePlan, PhaseReport, run_phase},
        },
    };
}
