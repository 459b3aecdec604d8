//! Mechanical, side-effecting operations.
//!
//! Each submodule owns one concern at the network (or filesystem) boundary:
//! packaging sources, dispatching lifecycle calls to peers, executing
//! transactions, and multiplexing channel events. Decisions come from
//! `domain/`; sequencing across operations lives in `workflow/`.

pub mod dispatch;
pub mod event;
pub mod execute;
pub mod package;
pub mod session;

use crate::ThisError;

///
/// OpsError
/// Error envelope shared across operations submodules
///

#[derive(Debug, ThisError)]
pub enum OpsError {
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),

    #[error(transparent)]
    Event(#[from] event::EventError),

    #[error(transparent)]
    Execution(#[from] execute::ExecutionError),

    #[error(transparent)]
    Package(#[from] package::PackageError),
}

macro_rules! impl_into_crate_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for crate::Error {
                fn from(err: $err) -> Self {
                    OpsError::from(err).into()
                }
            }
        )*
    };
}

impl_into_crate_error!(
    dispatch::DispatchError,
    event::EventError,
    execute::ExecutionError,
    package::PackageError,
);
