//! Deployable units executed by the simulated peers.
//!
//! A [`Chaincode`] sees the channel's committed state through a [`Stub`]
//! and records writes and at most one event. Nothing it writes is visible
//! until the transaction commits.

use derive_more::Display;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// ChaincodeError
/// Application-level failures; peers report them as status 500.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum ChaincodeError {
    #[error("incorrect number of arguments for '{function}': expected {expected}, got {got}")]
    InvalidArgs {
        function: KvFunction,
        expected: usize,
        got: usize,
    },

    #[error("get failed for key '{0}': not found")]
    NotFound(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),
}

///
/// Effects
/// Writes and event produced by one simulation.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Effects {
    pub writes: BTreeMap<String, Vec<u8>>,
    pub event: Option<(String, Vec<u8>)>,
}

///
/// Stub
///

pub struct Stub<'a> {
    committed: &'a BTreeMap<String, Vec<u8>>,
    effects: Effects,
}

impl<'a> Stub<'a> {
    #[must_use]
    pub fn new(committed: &'a BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            committed,
            effects: Effects::default(),
        }
    }

    /// Reads see this simulation's own writes first.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<&[u8]> {
        self.effects
            .writes
            .get(key)
            .or_else(|| self.committed.get(key))
            .map(Vec::as_slice)
    }

    pub fn put_state(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.effects.writes.insert(key.into(), value.into());
    }

    /// Replaces any event set earlier in the same simulation.
    pub fn set_event(&mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.effects.event = Some((name.into(), payload.into()));
    }

    #[must_use]
    pub fn into_effects(self) -> Effects {
        self.effects
    }
}

///
/// Chaincode
///

pub trait Chaincode: Send + Sync {
    /// Runs once per instantiate or upgrade.
    fn init(&self, stub: &mut Stub<'_>, args: &[Vec<u8>]) -> Result<Vec<u8>, ChaincodeError>;

    /// `function` arrives verbatim from the proposal.
    fn invoke(
        &self,
        stub: &mut Stub<'_>,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>, ChaincodeError>;
}

// -----------------------------------------------------------------------------
// KvStore
// -----------------------------------------------------------------------------

///
/// KvFunction
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[remain::sorted]
pub enum KvFunction {
    #[display("get")]
    Get,
    #[display("set")]
    Set,
}

const KV_FUNCTIONS: &[(&str, KvFunction)] = &[("get", KvFunction::Get), ("set", KvFunction::Set)];

impl KvFunction {
    pub fn resolve(name: &str) -> Result<Self, ChaincodeError> {
        KV_FUNCTIONS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, function)| *function)
            .ok_or_else(|| ChaincodeError::UnknownFunction(name.to_string()))
    }

    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Get => 1,
            Self::Set => 2,
        }
    }
}

/// Event name emitted by `set`; the payload is the stored value.
pub const SET_EVENT: &str = "set";

///
/// KvStore
/// Two-operation key-value store.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct KvStore;

impl Chaincode for KvStore {
    fn init(&self, _stub: &mut Stub<'_>, _args: &[Vec<u8>]) -> Result<Vec<u8>, ChaincodeError> {
        Ok(b"chaincode init success".to_vec())
    }

    fn invoke(
        &self,
        stub: &mut Stub<'_>,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>, ChaincodeError> {
        let function = KvFunction::resolve(function)?;
        if args.len() != function.arity() {
            return Err(ChaincodeError::InvalidArgs {
                function,
                expected: function.arity(),
                got: args.len(),
            });
        }

        let key = String::from_utf8_lossy(&args[0]).into_owned();
        match function {
            KvFunction::Get => stub
                .get_state(&key)
                .map(<[u8]>::to_vec)
                .ok_or(ChaincodeError::NotFound(key)),
            KvFunction::Set => {
                let value = args[1].clone();
                stub.put_state(key, value.clone());
                stub.set_event(SET_EVENT, value);

                Ok(b"set success".to_vec())
            }
        }
    }
}

///
/// TESTS
///
