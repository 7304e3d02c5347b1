//! Chain-level data carried through the broadcaster: raw logs as the chain
//! client reports them, block headers, filter queries, and the identities
//! listeners use as keys in the consumed-log store.

use alloy_primitives::{Address, Bytes, B256};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A contract log exactly as received from the chain client.
///
/// A `removed` log has been invalidated by a chain reorganisation and is
/// never delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    pub removed: bool,
}

impl RawLog {
    /// The event selector (`topics[0]`), if the log carries any topics.
    pub fn event_id(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// The subset of a block header the broadcaster needs for backfilling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub hash: B256,
}

/// A log filter over a set of contract addresses.
///
/// `from_block == None` means "from the current head", which is what live
/// subscriptions use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterQuery {
    pub from_block: Option<u64>,
    pub addresses: Vec<Address>,
}

impl FilterQuery {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            from_block: None,
            addresses,
        }
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }
}

/// Identifier of a v1 job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// The identity a listener processes logs under.
///
/// Each scheme maps onto its own family of consumed-log markers, so a v1 and
/// a v2 job never observe each other's markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JobIdentity {
    V1(JobId),
    V2(i32),
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobIdentity::V1(id) => write!(f, "job:{id}"),
            JobIdentity::V2(id) => write!(f, "job-v2:{id}"),
        }
    }
}
