// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::ForwardRequest;
use crate::error::{OperatorError, OperatorResult};
use ethers::abi::RawLog;
use ethers::types::{Address, Bytes, TxHash, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First four bytes of the keccak hash of a function signature.
pub type Selector = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentStatus {
    Pending,
    Committed,
    Voided,
    Canceled,
}

impl CommitmentStatus {
    /// Resolves the on-chain flags. At most one of them may be set.
    pub fn from_flags(voided: bool, committed: bool, canceled: bool) -> OperatorResult<Self> {
        match (voided, committed, canceled) {
            (false, false, false) => Ok(CommitmentStatus::Pending),
            (true, false, false) => Ok(CommitmentStatus::Voided),
            (false, true, false) => Ok(CommitmentStatus::Committed),
            (false, false, true) => Ok(CommitmentStatus::Canceled),
            _ => Err(OperatorError::DecodeError(format!(
                "conflicting commitment flags: voided={} committed={} canceled={}",
                voided, committed, canceled
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Pending => "pending",
            CommitmentStatus::Committed => "committed",
            CommitmentStatus::Voided => "voided",
            CommitmentStatus::Canceled => "canceled",
        }
    }
}

/// A plain call executed by the operator itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectCall {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

/// A signed meta-transaction executed through the destination forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedCall {
    pub request: ForwardRequest,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPayload {
    Direct(DirectCall),
    Forwarded(ForwardedCall),
}

impl ExecutionPayload {
    /// The contract the encoded call is ultimately meant for.
    pub fn target(&self) -> Address {
        match self {
            ExecutionPayload::Direct(call) => call.target,
            ExecutionPayload::Forwarded(call) => call.request.to,
        }
    }

    pub fn calldata(&self) -> &Bytes {
        match self {
            ExecutionPayload::Direct(call) => &call.data,
            ExecutionPayload::Forwarded(call) => &call.request.data,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            ExecutionPayload::Direct(call) => call.value,
            ExecutionPayload::Forwarded(call) => call.request.value,
        }
    }

    pub fn selector(&self) -> Option<Selector> {
        let data = self.calldata();
        if data.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        Some(selector)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionPayload::Direct(_) => "direct",
            ExecutionPayload::Forwarded(_) => "forwarded",
        }
    }
}

/// Identifies a commitment across all configured chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitmentKey {
    pub origin_chain_id: u64,
    pub index: U256,
}

impl fmt::Display for CommitmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin_chain_id, self.index)
    }
}

/// Snapshot of a commitment as read from its origin portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub index: U256,
    pub owner: Address,
    pub currency: Address,
    pub amount: U256,
    pub timestamp: U256,
    pub origin_chain_id: u64,
    /// Destination chain
    pub chain_id: u64,
    pub payload: ExecutionPayload,
    pub status: CommitmentStatus,
}

impl Commitment {
    pub fn key(&self) -> CommitmentKey {
        CommitmentKey {
            origin_chain_id: self.origin_chain_id,
            index: self.index,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CommitmentStatus::Pending
    }
}

/// A log entry as returned by the provider, trimmed to what the indexer caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl RawEvent {
    pub fn raw_log(&self) -> RawLog {
        RawLog {
            topics: self.topics.clone(),
            data: self.data.to_vec(),
        }
    }

    /// Reads an indexed `uint256` argument; `position` 0 is the first indexed field.
    pub fn indexed_uint(&self, position: usize) -> OperatorResult<U256> {
        self.topics
            .get(position + 1)
            .map(|topic| U256::from_big_endian(topic.as_bytes()))
            .ok_or_else(|| {
                OperatorError::DecodeError(format!(
                    "log {:?}#{} has no indexed argument {}",
                    self.tx_hash, self.log_index, position
                ))
            })
    }
}

/// Positional topic filter. The first entry is the event signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub topics: Vec<H256>,
}

impl EventFilter {
    pub fn new(signature: H256) -> Self {
        Self {
            topics: vec![signature],
        }
    }

    pub fn with_topic(mut self, topic: H256) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn matches(&self, event: &RawEvent) -> bool {
        self.topics
            .iter()
            .enumerate()
            .all(|(i, topic)| event.topics.get(i) == Some(topic))
    }

    pub fn hash(&self) -> H256 {
        let bytes: Vec<u8> = self
            .topics
            .iter()
            .flat_map(|topic| topic.as_bytes().to_vec())
            .collect();
        H256::from(keccak256(bytes))
    }
}

/// Events returned by one query plus the last block the provider actually covered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<RawEvent>,
    pub last_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeParameters {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: Option<U256>,
    pub fees: Option<FeeParameters>,
}

impl TxRequest {
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value: U256::zero(),
            data: data.into(),
            gas_limit: None,
            fees: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_fees(mut self, fees: FeeParameters) -> Self {
        self.fees = Some(fees);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub success: bool,
    pub return_data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}
