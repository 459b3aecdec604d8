pub mod deploy;
pub mod endorsement;
pub mod idempotency;

use crate::{ThisError, domain::DomainError};

///
/// PolicyError
///

#[derive(Debug, ThisError)]
pub enum PolicyError {
    #[error(transparent)]
    Endorsement(#[from] endorsement::EndorsementPolicyError),
}

impl From<PolicyError> for crate::Error {
    fn from(err: PolicyError) -> Self {
        DomainError::from(err).into()
    }
}
