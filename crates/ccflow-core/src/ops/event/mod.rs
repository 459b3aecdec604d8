//! Channel event subscriptions.
//!
//! One upstream block stream per [`EventService`]; every registration gets
//! its own bounded channel and its own forwarding task.

mod cache;
mod service;

pub use service::{EventService, Registration, RegistrationGuard};

use crate::{
    ids::{ChaincodeId, TxId},
    ops::session::{Block, DeliveredBlock, TransportError, ValidationCode},
};
use derive_more::Display;
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// EventError
///

#[derive(Debug, ThisError)]
pub enum EventError {
    #[error("event service is closed")]
    Closed,

    #[error("invalid event name pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("registration {0} is not registered")]
    NotRegistered(RegistrationId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

///
/// EventSettings
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventSettings {
    /// Capacity of each registration's delivery channel.
    pub listener_buffer: usize,

    /// Blocks retained for registrations that fall behind.
    pub stream_capacity: usize,

    /// Recently committed transaction statuses kept for late registrations.
    pub tx_status_cache: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            listener_buffer: 100,
            stream_capacity: 256,
            tx_status_cache: 1024,
        }
    }
}

///
/// RegistrationId
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{_0}")]
pub struct RegistrationId(pub u64);

///
/// EventKind
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[remain::sorted]
pub enum EventKind {
    Block,
    ChaincodeEvent,
    FilteredBlock,
    TxStatus,
}

// -----------------------------------------------------------------------------
// Event payloads
// -----------------------------------------------------------------------------

///
/// BlockEvent
///

#[derive(Clone, Debug)]
pub struct BlockEvent {
    pub number: u64,
    pub data_hash: Vec<u8>,
    pub previous_hash: Vec<u8>,
    pub block: Arc<Block>,
    pub source: String,
}

impl From<&DeliveredBlock> for BlockEvent {
    fn from(delivered: &DeliveredBlock) -> Self {
        let block = &delivered.block;

        Self {
            number: block.number,
            data_hash: block.data_hash.clone(),
            previous_hash: block.previous_hash.clone(),
            block: Arc::clone(block),
            source: delivered.source.clone(),
        }
    }
}

///
/// FilteredTransaction
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilteredTransaction {
    pub tx_id: TxId,
    pub validation_code: ValidationCode,
}

///
/// FilteredBlockEvent
/// Block notification carrying only ids and validation codes.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilteredBlockEvent {
    pub number: u64,
    pub transactions: Vec<FilteredTransaction>,
    pub source: String,
}

impl From<&DeliveredBlock> for FilteredBlockEvent {
    fn from(delivered: &DeliveredBlock) -> Self {
        Self {
            number: delivered.block.number,
            transactions: delivered
                .block
                .transactions
                .iter()
                .map(|tx| FilteredTransaction {
                    tx_id: tx.tx_id.clone(),
                    validation_code: tx.validation_code,
                })
                .collect(),
            source: delivered.source.clone(),
        }
    }
}

///
/// TxStatusEvent
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxStatusEvent {
    pub tx_id: TxId,
    pub validation_code: ValidationCode,
    pub block_number: u64,
    pub source: String,
}

impl TxStatusEvent {
    pub(crate) fn all(delivered: &DeliveredBlock) -> impl Iterator<Item = Self> + '_ {
        delivered.block.transactions.iter().map(|tx| Self {
            tx_id: tx.tx_id.clone(),
            validation_code: tx.validation_code,
            block_number: delivered.block.number,
            source: delivered.source.clone(),
        })
    }
}

///
/// ChaincodeEvent
/// Payload bytes exactly as set by the chaincode.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChaincodeEvent {
    pub chaincode_id: ChaincodeId,
    pub event_name: String,
    pub payload: Vec<u8>,
    pub tx_id: TxId,
    pub block_number: u64,
    pub source: String,
}

impl ChaincodeEvent {
    // valid transactions only
    pub(crate) fn all(delivered: &DeliveredBlock) -> impl Iterator<Item = Self> + '_ {
        delivered
            .block
            .transactions
            .iter()
            .filter(|tx| tx.validation_code.is_valid())
            .filter_map(|tx| {
                tx.chaincode_event.as_ref().map(|ev| Self {
                    chaincode_id: ev.chaincode_id.clone(),
                    event_name: ev.event_name.clone(),
                    payload: ev.payload.clone(),
                    tx_id: tx.tx_id.clone(),
                    block_number: delivered.block.number,
                    source: delivered.source.clone(),
                })
            })
    }
}

///
/// TESTS
///
