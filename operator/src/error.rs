// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::providers::{ProviderError, RpcError};
use ethers::types::TxHash;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperatorError {
    // Timeouts, rate limits, dropped connections
    #[error("transient provider error: {0}")]
    TransientProviderError(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    // A view call reverted
    #[error("contract call reverted: {0}")]
    ContractReverted(String),
    #[error("gas estimation failed: {0}")]
    GasEstimationFailed(String),
    #[error("transaction {0:?} reverted")]
    TransactionReverted(TxHash),
    #[error("transaction {tx_hash:?} on chain {chain_id} not confirmed within {waited:?}")]
    ConfirmationTimeout {
        chain_id: u64,
        tx_hash: TxHash,
        waited: Duration,
    },
    // Provider returned a window that ends before it starts
    #[error("event query on chain {chain_id} made no progress from block {from_block}")]
    IndexerNoProgress { chain_id: u64, from_block: u64 },
    #[error("chain {0} is not configured")]
    UnknownChain(u64),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("storage error: {0}")]
    StorageError(String),
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("{0}")]
    Generic(String),
}

impl OperatorError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            OperatorError::TransientProviderError(_) => "transient_provider_error",
            OperatorError::ProviderError(_) => "provider_error",
            OperatorError::ContractReverted(_) => "contract_reverted",
            OperatorError::GasEstimationFailed(_) => "gas_estimation_failed",
            OperatorError::TransactionReverted(_) => "transaction_reverted",
            OperatorError::ConfirmationTimeout { .. } => "confirmation_timeout",
            OperatorError::IndexerNoProgress { .. } => "indexer_no_progress",
            OperatorError::UnknownChain(_) => "unknown_chain",
            OperatorError::DecodeError(_) => "decode_error",
            OperatorError::StorageError(_) => "storage_error",
            OperatorError::ConfigError(_) => "config_error",
            OperatorError::Generic(_) => "generic",
        }
    }

    /// Whether retrying on the next poll cycle can plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OperatorError::TransientProviderError(_)
                | OperatorError::ProviderError(_)
                | OperatorError::ConfirmationTimeout { .. }
                | OperatorError::IndexerNoProgress { .. }
                | OperatorError::StorageError(_)
        )
    }
}

impl From<ProviderError> for OperatorError {
    fn from(err: ProviderError) -> Self {
        // A JSON-RPC error response means the node answered; anything else is transport
        if err.as_error_response().is_some() {
            return OperatorError::ProviderError(err.to_string());
        }
        if matches!(
            err,
            ProviderError::JsonRpcClientError(_) | ProviderError::HTTPError(_)
        ) {
            OperatorError::TransientProviderError(err.to_string())
        } else {
            OperatorError::ProviderError(err.to_string())
        }
    }
}

impl From<ethers::abi::Error> for OperatorError {
    fn from(err: ethers::abi::Error) -> Self {
        OperatorError::DecodeError(err.to_string())
    }
}

impl From<ethers::abi::AbiError> for OperatorError {
    fn from(err: ethers::abi::AbiError) -> Self {
        OperatorError::DecodeError(err.to_string())
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for OperatorError {
    fn from(err: std::io::Error) -> Self {
        OperatorError::StorageError(err.to_string())
    }
}

pub type OperatorResult<T> = Result<T, OperatorError>;
