//! Deterministic decision rules.
//!
//! Nothing under `domain/` performs I/O, spawns tasks or touches a session.

pub mod policy;

use crate::ThisError;

///
/// DomainError
///

#[derive(Debug, ThisError)]
pub enum DomainError {
    #[error(transparent)]
    Policy(#[from] policy::PolicyError),
}
