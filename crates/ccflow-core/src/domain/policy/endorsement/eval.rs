// Policy evaluation:
// - each signer may satisfy at most one SignedBy leaf
// - a NOutOf node only commits its consumed signers when it succeeds

use super::{MspPrincipal, MspRole, SignaturePolicy, SignaturePolicyEnvelope};
use crate::ids::MspId;
use serde::{Deserialize, Serialize};

///
/// Signer
/// Identity that produced one endorsement signature.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct Signer {
    pub msp_id: MspId,
    pub role: MspRole,
}

impl Signer {
    #[must_use]
    pub const fn new(msp_id: MspId, role: MspRole) -> Self {
        Self { msp_id, role }
    }

    /// `member` principals accept any role of the same MSP; every other role
    /// must match exactly.
    #[must_use]
    pub fn satisfies(&self, principal: &MspPrincipal) -> bool {
        self.msp_id == principal.msp_id
            && (principal.role == MspRole::Member || principal.role == self.role)
    }
}

impl SignaturePolicyEnvelope {
    /// Returns true when the given signature set satisfies the policy.
    #[must_use]
    pub fn is_satisfied_by(&self, signers: &[Signer]) -> bool {
        let mut used = vec![false; signers.len()];

        evaluate(&self.rule, &self.identities, signers, &mut used)
    }
}

fn evaluate(
    rule: &SignaturePolicy,
    identities: &[MspPrincipal],
    signers: &[Signer],
    used: &mut [bool],
) -> bool {
    match rule {
        SignaturePolicy::SignedBy(index) => {
            let Some(principal) = identities.get(*index) else {
                return false;
            };

            for (slot, signer) in used.iter_mut().zip(signers) {
                if !*slot && signer.satisfies(principal) {
                    *slot = true;
                    return true;
                }
            }

            false
        }
        SignaturePolicy::NOutOf { n, rules } => {
            let mut scratch = used.to_vec();
            let mut verified = 0;

            for rule in rules {
                if evaluate(rule, identities, signers, &mut scratch) {
                    verified += 1;
                }
            }

            if verified >= *n {
                used.copy_from_slice(&scratch);
                true
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::endorsement::{PolicyExpr, SignaturePolicyEnvelope};

    fn envelope(raw: &str) -> SignaturePolicyEnvelope {
        SignaturePolicyEnvelope::compile(&PolicyExpr::parse(raw).unwrap())
    }

    fn signer(msp: &'static str, role: MspRole) -> Signer {
        Signer::new(MspId::new(msp), role)
    }

    #[test]
    fn a_signer_counts_only_once() {
        let policy = envelope("AND('A.member', 'A.member')");

        assert!(!policy.is_satisfied_by(&[signer("A", MspRole::Peer)]));
        assert!(policy.is_satisfied_by(&[signer("A", MspRole::Peer), signer("A", MspRole::Client)]));
    }

    #[test]
    fn specific_roles_must_match_exactly() {
        let policy = envelope("OR('A.admin')");

        assert!(!policy.is_satisfied_by(&[signer("A", MspRole::Peer)]));
        assert!(policy.is_satisfied_by(&[signer("A", MspRole::Admin)]));
    }

    #[test]
    fn out_of_counts_distinct_orgs() {
        let policy = envelope("OutOf(2, 'A.member', 'B.member', 'C.member')");

        assert!(!policy.is_satisfied_by(&[signer("C", MspRole::Peer)]));
        assert!(policy.is_satisfied_by(&[signer("C", MspRole::Peer), signer("A", MspRole::Peer)]));
        assert!(!policy.is_satisfied_by(&[]));
    }

    #[test]
    fn failed_branch_does_not_consume_signers() {
        // the AND branch fails, so A's signature stays available for the OR
        let policy = envelope("OR(AND('A.member', 'B.member'), 'A.member')");

        assert!(policy.is_satisfied_by(&[signer("A", MspRole::Peer)]));
    }
}
