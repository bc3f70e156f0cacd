// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Executes one pending commitment on its destination chain and settles it on
//! its origin chain.

use crate::abi::{CancelCall, CommitCall, ExecuteCall, ExecuteReturn};
use crate::chains::{ChainHandle, ChainRegistry};
use crate::error::{OperatorError, OperatorResult};
use crate::metrics::OperatorMetrics;
use crate::policy::Authorization;
use crate::types::{Commitment, CommitmentKey, ExecutionPayload, SimulationResult, TxRequest};
use ethers::abi::{AbiDecode, AbiEncode, ParamType};
use ethers::types::{Bytes, TxHash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tap::TapFallible;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Selector of the standard `Error(string)` revert payload
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// What to do with a commitment whose execution would fail right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationFailurePolicy {
    /// Leave it pending and try again next cycle
    #[default]
    Skip,
    /// Cancel it on the origin chain
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub confirmation_timeout: Duration,
    pub settlement_timeout: Duration,
    pub simulation_failure_policy: SimulationFailurePolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(60),
            settlement_timeout: Duration::from_secs(30),
            simulation_failure_policy: SimulationFailurePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Executed on the destination and committed on the origin
    Settled {
        execution_tx: TxHash,
        settlement_tx: TxHash,
    },
    Rejected(String),
    /// Gas estimation failed earlier in this process
    SkippedKnownFailure,
    /// Left pending for the next cycle
    SimulationFailed(String),
    Canceled {
        cancel_tx: TxHash,
        reason: String,
    },
    /// Remembered as failing for the rest of the process lifetime
    GasEstimationFailed(String),
}

impl RelayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Settled { .. } => "settled",
            RelayOutcome::Rejected(_) => "rejected",
            RelayOutcome::SkippedKnownFailure => "skipped_known_failure",
            RelayOutcome::SimulationFailed(_) => "simulation_failed",
            RelayOutcome::Canceled { .. } => "canceled",
            RelayOutcome::GasEstimationFailed(_) => "gas_estimation_failed",
        }
    }
}

/// Commitments whose gas estimation failed. Lost on restart.
#[derive(Debug, Default)]
pub struct FailureMemo {
    keys: Mutex<HashSet<CommitmentKey>>,
}

impl FailureMemo {
    pub async fn contains(&self, key: &CommitmentKey) -> bool {
        self.keys.lock().await.contains(key)
    }

    /// Returns false if the key was already present.
    pub async fn insert(&self, key: CommitmentKey) -> bool {
        self.keys.lock().await.insert(key)
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }
}

pub struct RelayExecutor {
    chains: Arc<ChainRegistry>,
    settings: RelaySettings,
    failures: FailureMemo,
    metrics: Arc<OperatorMetrics>,
}

impl RelayExecutor {
    pub fn new(
        chains: Arc<ChainRegistry>,
        settings: RelaySettings,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            chains,
            settings,
            failures: FailureMemo::default(),
            metrics,
        }
    }

    pub fn failures(&self) -> &FailureMemo {
        &self.failures
    }

    /// Runs one commitment through authorize, estimate, simulate, execute,
    /// confirm and commit. Errors leave the commitment pending on chain.
    pub async fn relay(&self, commitment: &Commitment) -> OperatorResult<RelayOutcome> {
        let outcome = self.relay_inner(commitment).await?;
        self.metrics
            .relay_outcomes
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }

    async fn relay_inner(&self, commitment: &Commitment) -> OperatorResult<RelayOutcome> {
        let key = commitment.key();
        let Some(origin) = self.chains.get(commitment.origin_chain_id) else {
            return Ok(RelayOutcome::Rejected(format!(
                "origin chain {} is not configured",
                commitment.origin_chain_id
            )));
        };
        let Some(destination) = self.chains.get(commitment.chain_id) else {
            warn!(
                "[{}] Commitment {} targets unconfigured chain {}",
                origin.name(),
                commitment.index,
                commitment.chain_id
            );
            return Ok(RelayOutcome::Rejected(format!(
                "destination chain {} is not configured",
                commitment.chain_id
            )));
        };

        if self.failures.contains(&key).await {
            return Ok(RelayOutcome::SkippedKnownFailure);
        }

        let authorization = destination
            .policy
            .authorize(commitment, &origin.settings, destination.client.as_ref())
            .await?;
        if let Authorization::Rejected(reason) = authorization {
            warn!(
                "[{}] Commitment {} rejected for {}: {}",
                origin.name(),
                commitment.index,
                destination.name(),
                reason
            );
            return Ok(RelayOutcome::Rejected(reason));
        }

        let Some(tx) = execution_tx(commitment, destination.as_ref()) else {
            warn!(
                "[{}] Commitment {} is forwarded but {} has no forwarder",
                origin.name(),
                commitment.index,
                destination.name()
            );
            return Ok(RelayOutcome::Rejected(format!(
                "{} has no forwarder",
                destination.name()
            )));
        };

        let started = Instant::now();
        // A revert here means the call cannot succeed as encoded
        let gas = match destination.client.estimate_gas(&tx).await {
            Ok(gas) => gas,
            Err(OperatorError::GasEstimationFailed(reason)) => {
                if self.failures.insert(key).await {
                    self.metrics
                        .permanently_failing_commitments
                        .with_label_values(&[origin.name()])
                        .inc();
                }
                warn!(
                    "[{}] Gas estimation for commitment {} failed, not retrying: {}",
                    origin.name(),
                    commitment.index,
                    reason
                );
                return Ok(RelayOutcome::GasEstimationFailed(reason));
            }
            Err(e) => return Err(e),
        };

        // Forwarders swallow inner reverts, so the static call has the last word
        let simulation = destination.client.simulate(&tx).await?;
        if let Err(reason) = check_simulation(commitment, &simulation) {
            return self
                .handle_simulation_failure(commitment, origin.as_ref(), reason)
                .await;
        }

        let fees = destination.client.fee_parameters().await?;
        let tx = tx.with_gas_limit(gas).with_fees(fees);
        let execution_tx = destination.client.send(&tx).await?;
        info!(
            "[{}] Executing commitment {}:{} in {:?}",
            destination.name(),
            origin.name(),
            commitment.index,
            execution_tx
        );
        self.confirm(
            destination.as_ref(),
            execution_tx,
            self.settings.confirmation_timeout,
        )
        .await?;

        let settlement_tx = self
            .submit_to_portal(
                origin.as_ref(),
                CommitCall {
                    index: commitment.index,
                }
                .encode(),
            )
            .await
            .tap_err(|e| {
                error!(
                    "[{}] Commitment {} executed in {:?} but commit failed: {:?}",
                    origin.name(),
                    commitment.index,
                    execution_tx,
                    e
                )
            })?;
        self.metrics
            .relay_latency
            .with_label_values(&[destination.name()])
            .observe(started.elapsed().as_secs_f64());
        info!(
            "[{}] Committed commitment {} in {:?}",
            origin.name(),
            commitment.index,
            settlement_tx
        );
        Ok(RelayOutcome::Settled {
            execution_tx,
            settlement_tx,
        })
    }

    async fn handle_simulation_failure(
        &self,
        commitment: &Commitment,
        origin: &ChainHandle,
        reason: String,
    ) -> OperatorResult<RelayOutcome> {
        match self.settings.simulation_failure_policy {
            SimulationFailurePolicy::Skip => {
                warn!(
                    "[{}] Simulation of commitment {} failed, skipping: {}",
                    origin.name(),
                    commitment.index,
                    reason
                );
                Ok(RelayOutcome::SimulationFailed(reason))
            }
            SimulationFailurePolicy::Cancel => {
                warn!(
                    "[{}] Simulation of commitment {} failed, canceling: {}",
                    origin.name(),
                    commitment.index,
                    reason
                );
                let cancel_tx = self
                    .submit_to_portal(
                        origin,
                        CancelCall {
                            index: commitment.index,
                        }
                        .encode(),
                    )
                    .await?;
                Ok(RelayOutcome::Canceled { cancel_tx, reason })
            }
        }
    }

    /// Sends a portal call on the origin chain and waits for it within the
    /// settlement timeout.
    async fn submit_to_portal(
        &self,
        origin: &ChainHandle,
        calldata: Vec<u8>,
    ) -> OperatorResult<TxHash> {
        let fees = origin.client.fee_parameters().await?;
        let tx = TxRequest::call(origin.settings.portal_address, calldata).with_fees(fees);
        let tx_hash = origin.client.send(&tx).await?;
        self.confirm(origin, tx_hash, self.settings.settlement_timeout)
            .await?;
        Ok(tx_hash)
    }

    async fn confirm(
        &self,
        chain: &ChainHandle,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> OperatorResult<()> {
        let receipt = tokio::time::timeout(
            timeout,
            chain
                .client
                .await_confirmations(tx_hash, chain.settings.num_confirmations),
        )
        .await
        .map_err(|_| OperatorError::ConfirmationTimeout {
            chain_id: chain.settings.chain_id,
            tx_hash,
            waited: timeout,
        })??;
        if !receipt.success {
            return Err(OperatorError::TransactionReverted(tx_hash));
        }
        Ok(())
    }
}

/// The destination transaction for a commitment, or `None` when a forwarded
/// payload has no forwarder to go through.
fn execution_tx(commitment: &Commitment, destination: &ChainHandle) -> Option<TxRequest> {
    match &commitment.payload {
        ExecutionPayload::Direct(call) => {
            Some(TxRequest::call(call.target, call.data.clone()).with_value(call.value))
        }
        ExecutionPayload::Forwarded(call) => {
            let forwarder = destination.settings.forwarder_address?;
            let data = ExecuteCall {
                req: call.request.clone(),
                signature: call.signature.clone(),
            }
            .encode();
            Some(TxRequest::call(forwarder, data).with_value(call.request.value))
        }
    }
}

/// A forwarder reports inner failures through its own success flag.
fn check_simulation(commitment: &Commitment, simulation: &SimulationResult) -> Result<(), String> {
    if !simulation.success {
        return Err(revert_reason(&simulation.return_data));
    }
    if let ExecutionPayload::Forwarded(_) = commitment.payload {
        let ExecuteReturn(success, data) = ExecuteReturn::decode(&simulation.return_data)
            .map_err(|e| format!("unreadable forwarder result: {}", e))?;
        if !success {
            return Err(revert_reason(&data));
        }
    }
    Ok(())
}

fn revert_reason(data: &Bytes) -> String {
    if data.is_empty() {
        return "reverted without reason".to_string();
    }
    if data.len() >= 4 && data[..4] == ERROR_STRING_SELECTOR {
        if let Ok(mut tokens) = ethers::abi::decode(&[ParamType::String], &data[4..]) {
            if let Some(reason) = tokens.pop().and_then(|token| token.into_string()) {
                return reason;
            }
        }
    }
    format!("reverted with 0x{}", ethers::utils::hex::encode(data))
}
