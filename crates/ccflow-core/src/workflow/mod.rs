//! Orchestration.
//!
//! Workflows sequence ops calls and own cross-step state. The lifecycle
//! coordinator drives install, deploy, invoke and query; the confirmer
//! tracks commits in the background; phases bundle a full run.

pub mod confirm;
pub mod lifecycle;
pub mod phase;

use crate::ThisError;

///
/// WorkflowError
///

#[derive(Debug, ThisError)]
pub enum WorkflowError {
    #[error(transparent)]
    Confirm(#[from] confirm::ConfirmError),

    #[error(transparent)]
    Lifecycle(#[from] lifecycle::LifecycleError),
}

impl From<confirm::ConfirmError> for crate::Error {
    fn from(err: confirm::ConfirmError) -> Self {
        WorkflowError::from(err).into()
    }
}

impl From<lifecycle::LifecycleError> for crate::Error {
    fn from(err: lifecycle::LifecycleError) -> Self {
        WorkflowError::from(err).into()
    }
}
