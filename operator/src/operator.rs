// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chains::ChainRegistry;
use crate::metrics::OperatorMetrics;
use crate::reconciler::CommitmentReconciler;
use crate::relay::{RelayExecutor, RelayOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pending: usize,
    pub settled: usize,
    pub rejected: usize,
    /// Simulation failures left pending and known gas failures
    pub skipped: usize,
    pub canceled: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Settled { .. } => self.settled += 1,
            RelayOutcome::Rejected(_) => self.rejected += 1,
            RelayOutcome::SkippedKnownFailure
            | RelayOutcome::SimulationFailed(_)
            | RelayOutcome::GasEstimationFailed(_) => self.skipped += 1,
            RelayOutcome::Canceled { .. } => self.canceled += 1,
        }
    }
}

/// The poll loop: reconcile every chain, then relay what is pending one
/// commitment at a time so each signer has a single transaction in flight.
pub struct Operator {
    chains: Arc<ChainRegistry>,
    reconciler: CommitmentReconciler,
    relay: RelayExecutor,
    poll_interval: Duration,
    metrics: Arc<OperatorMetrics>,
}

impl Operator {
    pub fn new(
        chains: Arc<ChainRegistry>,
        reconciler: CommitmentReconciler,
        relay: RelayExecutor,
        poll_interval: Duration,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            chains,
            reconciler,
            relay,
            poll_interval,
            metrics,
        }
    }

    pub async fn run_once(&self) -> CycleReport {
        let pending = self.reconciler.pending_commitments().await;
        let mut report = CycleReport {
            pending: pending.len(),
            ..Default::default()
        };

        for commitment in &pending {
            match self.relay.relay(commitment).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    let origin = self
                        .chains
                        .get(commitment.origin_chain_id)
                        .map(|chain| chain.name().to_string())
                        .unwrap_or_else(|| commitment.origin_chain_id.to_string());
                    error!(
                        "[{}] Failed to relay commitment {}: {:?}",
                        origin, commitment.index, e
                    );
                    self.metrics
                        .relay_errors
                        .with_label_values(&[e.error_type()])
                        .inc();
                    report.failed += 1;
                }
            }
        }

        self.metrics.poll_cycles.inc();
        report
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting operator loop over {} chains, polling every {:?}",
            self.chains.len(),
            self.poll_interval
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Operator loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_once().await;
                    info!(
                        "Poll cycle done: {} pending, {} settled, {} rejected, {} skipped, {} canceled, {} failed",
                        report.pending,
                        report.settled,
                        report.rejected,
                        report.skipped,
                        report.canceled,
                        report.failed
                    );
                }
            }
        }
    }
}
