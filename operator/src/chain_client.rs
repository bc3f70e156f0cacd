// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::ChainSettings;
use crate::error::{OperatorError, OperatorResult};
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::OperatorMetrics;
use crate::types::{
    EventBatch, EventFilter, FeeParameters, RawEvent, SimulationResult, TxReceiptSummary,
    TxRequest,
};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, Filter, Log, TransactionRequest, TxHash, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Capabilities the operator needs from one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Human readable name used in logs and metric labels.
    fn chain_name(&self) -> &str;

    /// Address transactions are sent from.
    fn signer_address(&self) -> Address;

    async fn current_block(&self) -> OperatorResult<u64>;

    /// Returns matching logs in `[from_block, to_block]`. The batch reports the
    /// last block actually covered, which may be below `to_block`.
    async fn query_events(
        &self,
        contract: Address,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> OperatorResult<EventBatch>;

    /// Static call against latest state; a revert is an error.
    async fn read_state(&self, contract: Address, calldata: Bytes) -> OperatorResult<Bytes>;

    async fn estimate_gas(&self, tx: &TxRequest) -> OperatorResult<U256>;

    /// Static call of `tx` from the signer; a revert is reported as `success == false`.
    async fn simulate(&self, tx: &TxRequest) -> OperatorResult<SimulationResult>;

    async fn send(&self, tx: &TxRequest) -> OperatorResult<TxHash>;

    /// Resolves once `tx_hash` is mined with at least `confirmations` blocks on top
    /// (the inclusion block counts as the first).
    async fn await_confirmations(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> OperatorResult<TxReceiptSummary>;

    async fn fee_parameters(&self) -> OperatorResult<FeeParameters>;
}

pub struct EthChainClient<P> {
    chain_id: u64,
    chain_name: String,
    provider: Provider<P>,
    signer: SignerMiddleware<Provider<P>, LocalWallet>,
    eip1559: bool,
    receipt_poll_interval: Duration,
}

impl EthChainClient<MeteredEthHttpProvider> {
    pub async fn new(
        chain: &ChainSettings,
        wallet: LocalWallet,
        metrics: Arc<OperatorMetrics>,
    ) -> anyhow::Result<Self> {
        let provider = new_metered_eth_provider(&chain.rpc_url, &chain.name, metrics)?;
        let client =
            Self::from_provider(provider, chain.chain_id, &chain.name, chain.eip1559, wallet);
        client.describe().await?;
        Ok(client)
    }
}

impl<P> EthChainClient<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    pub fn from_provider(
        provider: Provider<P>,
        chain_id: u64,
        chain_name: &str,
        eip1559: bool,
        wallet: LocalWallet,
    ) -> Self {
        let signer = SignerMiddleware::new(provider.clone(), wallet.with_chain_id(chain_id));
        Self {
            chain_id,
            chain_name: chain_name.to_string(),
            provider,
            signer,
            eip1559,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    // Refuse to run against the wrong network
    async fn describe(&self) -> anyhow::Result<()> {
        let remote_chain_id = self.provider.get_chainid().await?.as_u64();
        if remote_chain_id != self.chain_id {
            return Err(anyhow::anyhow!(
                "[{}] Chain ID mismatch: expected {}, got {}",
                self.chain_name,
                self.chain_id,
                remote_chain_id
            ));
        }
        let block_number = self.provider.get_block_number().await?;
        info!(
            "[{}] Connected to chain {} as {:?}, current block: {}",
            self.chain_name,
            self.chain_id,
            self.signer.address(),
            block_number
        );
        Ok(())
    }

    fn typed_tx(&self, tx: &TxRequest) -> TypedTransaction {
        let eip1559 = match tx.fees {
            Some(FeeParameters::Eip1559 { .. }) => true,
            Some(FeeParameters::Legacy { .. }) => false,
            None => self.eip1559,
        };
        if eip1559 {
            let mut request = Eip1559TransactionRequest::new()
                .from(self.signer.address())
                .to(tx.to)
                .value(tx.value)
                .data(tx.data.clone())
                .chain_id(self.chain_id);
            if let Some(gas) = tx.gas_limit {
                request = request.gas(gas);
            }
            if let Some(FeeParameters::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) = tx.fees
            {
                request = request
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
            request.into()
        } else {
            let mut request = TransactionRequest::new()
                .from(self.signer.address())
                .to(tx.to)
                .value(tx.value)
                .data(tx.data.clone())
                .chain_id(self.chain_id);
            if let Some(gas) = tx.gas_limit {
                request = request.gas(gas);
            }
            if let Some(FeeParameters::Legacy { gas_price }) = tx.fees {
                request = request.gas_price(gas_price);
            }
            request.into()
        }
    }
}

/// Returns the revert payload if the node rejected the call as a revert.
fn revert_data(err: &ProviderError) -> Option<Bytes> {
    let response = err.as_error_response()?;
    if response.is_revert() {
        Some(response.as_revert_data().unwrap_or_default())
    } else {
        None
    }
}

fn revert_message(err: &ProviderError, data: &Bytes) -> String {
    match err.as_error_response() {
        Some(response) if data.is_empty() => response.message.clone(),
        Some(response) => format!(
            "{} (0x{})",
            response.message,
            ethers::utils::hex::encode(data)
        ),
        None => err.to_string(),
    }
}

fn raw_event_from_log(log: Log) -> OperatorResult<RawEvent> {
    let block_number = log
        .block_number
        .ok_or_else(|| OperatorError::ProviderError("log without block_number".into()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| OperatorError::ProviderError("log without transaction_hash".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| OperatorError::ProviderError("log without log_index".into()))?;
    Ok(RawEvent {
        block_number: block_number.as_u64(),
        tx_hash,
        log_index: log_index.as_u64(),
        topics: log.topics,
        data: log.data,
    })
}

#[async_trait]
impl<P> ChainClient for EthChainClient<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn current_block(&self) -> OperatorResult<u64> {
        let block = self.provider.get_block_number().await?;
        Ok(block.as_u64())
    }

    async fn query_events(
        &self,
        contract: Address,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> OperatorResult<EventBatch> {
        let mut query = Filter::new()
            .address(contract)
            .from_block(from_block)
            .to_block(to_block);
        for (position, topic) in filter.topics.iter().enumerate() {
            query = match position {
                0 => query.topic0(*topic),
                1 => query.topic1(*topic),
                2 => query.topic2(*topic),
                3 => query.topic3(*topic),
                _ => {
                    return Err(OperatorError::Generic(format!(
                        "event filter has {} topics, at most 4 are supported",
                        filter.topics.len()
                    )))
                }
            };
        }
        let logs = self
            .provider
            .get_logs(&query)
            .await
            .map_err(OperatorError::from)
            .tap_err(|e| {
                error!(
                    "[{}] get_logs failed. Filter: {:?}. Error {:?}",
                    self.chain_name, query, e
                )
            })?;

        // Safeguard check that all events are emitted from requested contract address
        if let Some(log) = logs.iter().find(|log| log.address != contract) {
            return Err(OperatorError::ProviderError(format!(
                "Provider returns logs from different contract address (expected: {:?}): {:?}",
                contract, log.address
            )));
        }
        let events = logs
            .into_iter()
            .filter(|log| log.removed != Some(true))
            .map(raw_event_from_log)
            .collect::<OperatorResult<Vec<_>>>()?;
        Ok(EventBatch {
            events,
            last_block: to_block,
        })
    }

    async fn read_state(&self, contract: Address, calldata: Bytes) -> OperatorResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(contract).data(calldata).into();
        self.provider.call(&tx, None).await.map_err(|e| match revert_data(&e) {
            Some(data) => OperatorError::ContractReverted(format!(
                "call to {:?} reverted with 0x{}",
                contract,
                ethers::utils::hex::encode(&data)
            )),
            None => OperatorError::from(e),
        })
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> OperatorResult<U256> {
        let typed = self.typed_tx(tx);
        self.provider
            .estimate_gas(&typed, None)
            .await
            .map_err(|e| match revert_data(&e) {
                Some(data) => OperatorError::GasEstimationFailed(revert_message(&e, &data)),
                // funds, nonce and rate limit errors say nothing about the call
                None => OperatorError::from(e),
            })
    }

    async fn simulate(&self, tx: &TxRequest) -> OperatorResult<SimulationResult> {
        let typed = self.typed_tx(tx);
        match self.provider.call(&typed, None).await {
            Ok(return_data) => Ok(SimulationResult {
                success: true,
                return_data,
            }),
            Err(e) => match revert_data(&e) {
                Some(return_data) => Ok(SimulationResult {
                    success: false,
                    return_data,
                }),
                None => Err(OperatorError::from(e)),
            },
        }
    }

    async fn send(&self, tx: &TxRequest) -> OperatorResult<TxHash> {
        let typed = self.typed_tx(tx);
        let pending = self
            .signer
            .send_transaction(typed, None)
            .await
            .map_err(|e| OperatorError::ProviderError(e.to_string()))
            .tap_err(|e| {
                error!(
                    "[{}] Failed to send transaction to {:?}: {:?}",
                    self.chain_name, tx.to, e
                )
            })?;
        Ok(pending.tx_hash())
    }

    async fn await_confirmations(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> OperatorResult<TxReceiptSummary> {
        let mut interval = tokio::time::interval(self.receipt_poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let receipt = match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => continue,
                Err(e) => {
                    debug!(
                        "[{}] Receipt query for {:?} failed, retrying: {:?}",
                        self.chain_name, tx_hash, e
                    );
                    continue;
                }
            };
            let Some(block_number) = receipt.block_number else {
                continue;
            };
            let block_number = block_number.as_u64();
            let latest = match self.provider.get_block_number().await {
                Ok(latest) => latest.as_u64(),
                Err(e) => {
                    debug!(
                        "[{}] Block number query failed, retrying: {:?}",
                        self.chain_name, e
                    );
                    continue;
                }
            };
            if latest + 1 >= block_number + confirmations.max(1) {
                return Ok(TxReceiptSummary {
                    tx_hash,
                    block_number,
                    // pre-byzantium receipts carry no status
                    success: receipt.status.map_or(true, |status| status.as_u64() == 1),
                });
            }
        }
    }

    async fn fee_parameters(&self) -> OperatorResult<FeeParameters> {
        if self.eip1559 {
            let (max_fee_per_gas, max_priority_fee_per_gas) =
                self.provider.estimate_eip1559_fees(None).await?;
            Ok(FeeParameters::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            })
        } else {
            let gas_price = self.provider.get_gas_price().await?;
            Ok(FeeParameters::Legacy { gas_price })
        }
    }
}
