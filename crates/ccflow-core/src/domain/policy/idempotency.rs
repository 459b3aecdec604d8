// Idempotency classification:
// - answers "does this peer rejection mean the work is already done?"
// - side-effect free, no logging
// - the ONLY place where response text is matched against markers

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Marker reported by peers when the package is already installed.
pub const ALREADY_INSTALLED: &str = "already installed";

/// Marker reported when the chaincode (or the version) already exists on the
/// channel.
pub const ALREADY_EXISTS: &str = "already exists";

/// Lowest status code treated as a failure.
pub const ERROR_STATUS_THRESHOLD: u16 = 400;

///
/// OperationKind
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[remain::sorted]
pub enum OperationKind {
    Install,
    Instantiate,
    Upgrade,
}

impl OperationKind {
    /// Install is the only operation that must name its peers explicitly.
    #[must_use]
    pub const fn requires_explicit_targets(self) -> bool {
        matches!(self, Self::Install)
    }

    #[must_use]
    pub const fn idempotent_marker(self) -> &'static str {
        match self {
            Self::Install => ALREADY_INSTALLED,
            Self::Instantiate | Self::Upgrade => ALREADY_EXISTS,
        }
    }
}

///
/// ResponseClass
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ResponseClass {
    Success,
    IdempotentConflict,
    Failure,
}

impl ResponseClass {
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failure)
    }
}

/// Classify one per-peer response.
///
/// Heuristic: a non-success status whose message contains the operation's
/// marker (case-insensitive substring) is downgraded to an idempotent
/// conflict. Success statuses are never inspected.
#[must_use]
pub fn classify_response(kind: OperationKind, status: u16, message: &str) -> ResponseClass {
    if status < ERROR_STATUS_THRESHOLD {
        return ResponseClass::Success;
    }

    if message
        .to_ascii_lowercase()
        .contains(kind.idempotent_marker())
    {
        ResponseClass::IdempotentConflict
    } else {
        ResponseClass::Failure
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_never_inspected() {
        assert_eq!(
            classify_response(OperationKind::Install, 200, "already installed"),
            ResponseClass::Success
        );
    }

    #[test]
    fn install_marker_is_substring_matched() {
        assert_eq!(
            classify_response(
                OperationKind::Install,
                500,
                "chaincode mycc:v1 Already Installed on peer0.org1"
            ),
            ResponseClass::IdempotentConflict
        );
        assert_eq!(
            classify_response(OperationKind::Install, 500, "chaincode already exists"),
            ResponseClass::Failure
        );
    }

    #[test]
    fn deploy_marker_applies_to_instantiate_and_upgrade() {
        for kind in [OperationKind::Instantiate, OperationKind::Upgrade] {
            assert_eq!(
                classify_response(kind, 500, "chaincode with name 'mycc' already exists"),
                ResponseClass::IdempotentConflict
            );
            assert_eq!(
                classify_response(kind, 503, "peer unavailable"),
                ResponseClass::Failure
            );
        }
    }
}
