//! Endorsement policy model, builder and evaluator.
//!
//! Policies are boolean signature requirements over MSP principals. The
//! textual form follows the usual `AND` / `OR` / `OutOf` grammar:
//!
//! ```text
//! OR('Org1MSP.member', 'Org2MSP.member')
//! AND('Org1MSP.member', OR('Org2MSP.admin', 'Org3MSP.peer'))
//! OutOf(2, 'Org1MSP.member', 'Org2MSP.member', 'Org3MSP.member')
//! ```
//!
//! Building is pure: no shared state, no I/O, safe to call concurrently.

mod eval;
mod parser;

pub use eval::Signer;

use crate::{
    domain::policy::PolicyError,
    ids::MspId,
    log,
    log::Topic,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use thiserror::Error as ThisError;

/// Shorthand accepted by [`PolicyBuilder::build`]: any member of the
/// requesting organization may endorse.
pub const ANY_POLICY: &str = "ANY";

///
/// EndorsementPolicyError
/// Malformed policy expressions.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum EndorsementPolicyError {
    #[error("policy expression is empty")]
    Empty,

    #[error("unexpected end of policy expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected '{found}' at offset {offset}, expected {expected}")]
    UnexpectedToken {
        offset: usize,
        found: String,
        expected: &'static str,
    },

    #[error("unknown policy operator '{0}' (expected AND, OR or OutOf)")]
    UnknownOperator(String),

    #[error("invalid principal '{0}' (expected '<MspId>.<role>')")]
    InvalidPrincipal(String),

    #[error("unknown principal role '{0}' (expected member, admin, client or peer)")]
    UnknownRole(String),

    #[error("threshold {n} is out of range for {count} sub-policies")]
    InvalidThreshold { n: u64, count: usize },

    #[error("policy expression nests deeper than {max} operators")]
    TooDeep { max: usize },

    #[error("unterminated quoted principal starting at offset {0}")]
    UnterminatedQuote(usize),
}

impl From<EndorsementPolicyError> for crate::Error {
    fn from(err: EndorsementPolicyError) -> Self {
        PolicyError::from(err).into()
    }
}

///
/// MspRole
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[remain::sorted]
pub enum MspRole {
    #[display("admin")]
    Admin,
    #[display("client")]
    Client,
    #[display("member")]
    Member,
    #[display("peer")]
    Peer,
}

impl MspRole {
    pub fn parse(role: &str) -> Result<Self, EndorsementPolicyError> {
        match role.to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "client" => Ok(Self::Client),
            "peer" => Ok(Self::Peer),
            _ => Err(EndorsementPolicyError::UnknownRole(role.to_string())),
        }
    }
}

///
/// MspPrincipal
/// `<MspId>.<role>` predicate over an identity.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[display("{msp_id}.{role}")]
pub struct MspPrincipal {
    pub msp_id: MspId,
    pub role: MspRole,
}

impl MspPrincipal {
    #[must_use]
    pub const fn new(msp_id: MspId, role: MspRole) -> Self {
        Self { msp_id, role }
    }

    #[must_use]
    pub const fn member(msp_id: MspId) -> Self {
        Self::new(msp_id, MspRole::Member)
    }

    /// Parse `Org1MSP.member`. The MSP id may itself contain dots; the role is
    /// everything after the last one.
    pub fn parse(raw: &str) -> Result<Self, EndorsementPolicyError> {
        let (msp, role) = raw
            .rsplit_once('.')
            .ok_or_else(|| EndorsementPolicyError::InvalidPrincipal(raw.to_string()))?;

        if msp.trim().is_empty() || role.trim().is_empty() {
            return Err(EndorsementPolicyError::InvalidPrincipal(raw.to_string()));
        }

        Ok(Self::new(MspId::owned(msp.to_string()), MspRole::parse(role)?))
    }
}

///
/// PolicyExpr
///
/// Expression tree produced by the parser. `AND` and `OR` are normalized to
/// `OutOf(len)` and `OutOf(1)` so evaluation has a single threshold rule.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyExpr {
    SignedBy(MspPrincipal),
    OutOf { n: usize, rules: Vec<Self> },
}

impl PolicyExpr {
    #[must_use]
    pub fn and(rules: Vec<Self>) -> Self {
        let n = rules.len();
        Self::OutOf { n, rules }
    }

    #[must_use]
    pub fn or(rules: Vec<Self>) -> Self {
        Self::OutOf { n: 1, rules }
    }

    /// Parse a textual policy expression.
    pub fn parse(input: &str) -> Result<Self, EndorsementPolicyError> {
        parser::parse(input)
    }
}

impl fmt::Display for PolicyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedBy(principal) => write!(f, "'{principal}'"),
            Self::OutOf { n, rules } => {
                let op = if *n == rules.len() && *n > 1 {
                    "AND("
                } else if *n == 1 {
                    "OR("
                } else {
                    "OutOf("
                };
                f.write_str(op)?;
                if op == "OutOf(" {
                    write!(f, "{n}, ")?;
                }
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{rule}")?;
                }
                f.write_str(")")
            }
        }
    }
}

///
/// SignaturePolicy
/// Compiled rule tree referencing identities by index into the envelope.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePolicy {
    SignedBy(usize),
    NOutOf { n: usize, rules: Vec<Self> },
}

///
/// SignaturePolicyEnvelope
///
/// Structured policy attached to instantiate/upgrade requests. Identities are
/// deduplicated in first-appearance order so identical expressions always
/// compile to identical envelopes.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SignaturePolicyEnvelope {
    pub version: u32,
    pub rule: SignaturePolicy,
    pub identities: Vec<MspPrincipal>,
}

impl SignaturePolicyEnvelope {
    /// Compile an expression tree into an envelope.
    #[must_use]
    pub fn compile(expr: &PolicyExpr) -> Self {
        let mut identities = Vec::new();
        let rule = compile_rule(expr, &mut identities);

        Self {
            version: 0,
            rule,
            identities,
        }
    }

    /// Envelope equivalent to "one signature from any member of `msp_ids`".
    #[must_use]
    pub fn signed_by_any_member(msp_ids: &[MspId]) -> Self {
        let rules = msp_ids
            .iter()
            .map(|msp| PolicyExpr::SignedBy(MspPrincipal::member(msp.clone())))
            .collect();

        Self::compile(&PolicyExpr::or(rules))
    }

    /// Serialize to the canonical JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// MSP ids referenced anywhere in the policy.
    #[must_use]
    pub fn msp_ids(&self) -> Vec<MspId> {
        self.identities
            .iter()
            .map(|p| p.msp_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn compile_rule(expr: &PolicyExpr, identities: &mut Vec<MspPrincipal>) -> SignaturePolicy {
    match expr {
        PolicyExpr::SignedBy(principal) => {
            let index = identities
                .iter()
                .position(|p| p == principal)
                .unwrap_or_else(|| {
                    identities.push(principal.clone());
                    identities.len() - 1
                });

            SignaturePolicy::SignedBy(index)
        }
        PolicyExpr::OutOf { n, rules } => SignaturePolicy::NOutOf {
            n: *n,
            rules: rules.iter().map(|r| compile_rule(r, identities)).collect(),
        },
    }
}

///
/// PolicyBuilder
///
/// Translates a policy string into an envelope on behalf of one requesting
/// organization. The `ANY` shortcut resolves against that organization only.
///
/// Known limitation: `ANY` never widens to the other organizations on the
/// channel, so on a multi-org channel whose validation expects more than the
/// requesting org it produces endorsements the network will reject.
///

#[derive(Clone, Debug)]
pub struct PolicyBuilder {
    requesting_msp: MspId,
}

impl PolicyBuilder {
    #[must_use]
    pub const fn new(requesting_msp: MspId) -> Self {
        Self { requesting_msp }
    }

    pub fn build(&self, expr: &str) -> Result<SignaturePolicyEnvelope, EndorsementPolicyError> {
        if expr.trim() == ANY_POLICY {
            log!(
                Topic::Policy,
                Debug,
                "policy: ANY resolved to any member of {}",
                self.requesting_msp
            );

            return Ok(SignaturePolicyEnvelope::signed_by_any_member(
                std::slice::from_ref(&self.requesting_msp),
            ));
        }

        let parsed = PolicyExpr::parse(expr)?;

        Ok(SignaturePolicyEnvelope::compile(&parsed))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(msp: &'static str, role: MspRole) -> Signer {
        Signer::new(MspId::new(msp), role)
    }

    #[test]
    fn or_policy_accepts_single_signer_from_either_org() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));
        let policy = builder
            .build("OR('Org1MSP.member','Org2MSP.member')")
            .expect("valid policy");

        assert!(policy.is_satisfied_by(&[signer("Org1MSP", MspRole::Peer)]));
        assert!(policy.is_satisfied_by(&[signer("Org2MSP", MspRole::Client)]));
        assert!(!policy.is_satisfied_by(&[signer("Org3MSP", MspRole::Peer)]));
    }

    #[test]
    fn and_policy_rejects_single_signer() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));
        let policy = builder
            .build("AND('Org1MSP.member','Org2MSP.member')")
            .expect("valid policy");

        assert!(!policy.is_satisfied_by(&[signer("Org1MSP", MspRole::Peer)]));
        assert!(policy.is_satisfied_by(&[
            signer("Org1MSP", MspRole::Peer),
            signer("Org2MSP", MspRole::Peer),
        ]));
    }

    #[test]
    fn policy_survives_json_round_trip_and_still_evaluates() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));
        let or_policy = builder.build("OR('A.member','B.member')").unwrap();
        let and_policy = builder.build("AND('A.member','B.member')").unwrap();

        let or_back = SignaturePolicyEnvelope::from_json(&or_policy.to_json().unwrap()).unwrap();
        let and_back = SignaturePolicyEnvelope::from_json(&and_policy.to_json().unwrap()).unwrap();

        let only_a = [signer("A", MspRole::Member)];
        assert!(or_back.is_satisfied_by(&only_a));
        assert!(!and_back.is_satisfied_by(&only_a));
    }

    #[test]
    fn any_shortcut_covers_only_requesting_org() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));
        let policy = builder.build("ANY").unwrap();

        assert_eq!(policy.identities, vec![MspPrincipal::member(MspId::new("Org1MSP"))]);
        assert!(policy.is_satisfied_by(&[signer("Org1MSP", MspRole::Client)]));
        assert!(!policy.is_satisfied_by(&[signer("Org2MSP", MspRole::Client)]));
    }

    #[test]
    fn identical_expressions_compile_identically() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));
        let a = builder.build("OR('A.member', 'A.member', 'B.admin')").unwrap();
        let b = builder.build("OR( 'A.member','A.member','B.admin' )").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.identities.len(), 2);
    }

    #[test]
    fn display_round_trips_through_parser() {
        for raw in [
            "AND('A.member', OR('B.admin', 'C.peer'))",
            "OutOf(2, 'A.member', 'B.member', 'C.client')",
            "OR('A.member')",
        ] {
            let expr = PolicyExpr::parse(raw).unwrap();
            let again = PolicyExpr::parse(&expr.to_string()).unwrap();
            assert_eq!(expr, again, "{raw}");
        }
    }

    #[test]
    fn malformed_expressions_are_parse_errors() {
        let builder = PolicyBuilder::new(MspId::new("Org1MSP"));

        assert_eq!(builder.build("  "), Err(EndorsementPolicyError::Empty));
        assert!(matches!(
            builder.build("XOR('A.member')"),
            Err(EndorsementPolicyError::UnknownOperator(op)) if op == "XOR"
        ));
        assert!(matches!(
            builder.build("OR('A.owner')"),
            Err(EndorsementPolicyError::UnknownRole(role)) if role == "owner"
        ));
        assert!(matches!(
            builder.build("OR('A.member'"),
            Err(EndorsementPolicyError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            builder.build("OutOf(3, 'A.member', 'B.member')"),
            Err(EndorsementPolicyError::InvalidThreshold { n: 3, count: 2 })
        ));
    }
}
