use crate::{
    config::ConfigError,
    domain::DomainError,
    ops::{
        OpsError, dispatch::DispatchError, event::EventError, execute::ExecutionError,
    },
    workflow::{WorkflowError, lifecycle::LifecycleError},
};
use derive_more::Display;
use thiserror::Error as ThisError;

///
/// Error
///
/// Crate-wide error. Every layer's error rolls up into one of these
/// variants; [`Error::class`] maps it onto the operator-facing taxonomy.
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ops(#[from] OpsError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl Error {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Config,
            Self::Domain(_) => ErrorClass::Parse,
            Self::Ops(err) => match err {
                OpsError::Package(_) => ErrorClass::Packaging,
                OpsError::Dispatch(err) => match err {
                    DispatchError::Transport { .. } => ErrorClass::Transport,
                    DispatchError::PeerRejected { .. } => ErrorClass::Rejected,
                    DispatchError::TargetsRequired { .. } | DispatchError::EmptyTargets { .. } => {
                        ErrorClass::FailedPrecondition
                    }
                },
                OpsError::Execution(ExecutionError::Network(_))
                | OpsError::Event(EventError::Transport(_)) => ErrorClass::Transport,
                OpsError::Execution(_) => ErrorClass::Execution,
                OpsError::Event(_) => ErrorClass::Event,
            },
            Self::Workflow(err) => match err {
                WorkflowError::Confirm(_) => ErrorClass::Event,
                WorkflowError::Lifecycle(LifecycleError::PackageMismatch { .. }) => {
                    ErrorClass::Packaging
                }
                WorkflowError::Lifecycle(_) => ErrorClass::FailedPrecondition,
            },
        }
    }

    /// True when the network produced no response at all.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self.class(), ErrorClass::Transport)
    }
}

///
/// ErrorClass
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[remain::sorted]
pub enum ErrorClass {
    Config,
    Event,
    Execution,
    FailedPrecondition,
    Packaging,
    Parse,
    Rejected,
    Transport,
}

///
/// TESTS
///
