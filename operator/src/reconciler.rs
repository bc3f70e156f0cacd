// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Derives the set of pending commitments across every configured chain.
//!
//! A commitment is pending when its `Escrowed` event was seen in the lookback
//! window, no `Committed` or `Voided` event names its index, and its void
//! delay has not yet elapsed. Candidates are then re-read from the portal and
//! the snapshot has the final say, which also drops cancellations since those
//! emit no event.

use crate::abi::{commitments_calldata, decode_commitment, CommittedFilter, EscrowedFilter};
use crate::abi::{VoidDelayCall, VoidDelayReturn, VoidedFilter};
use crate::chains::{ChainHandle, ChainRegistry};
use crate::error::{OperatorError, OperatorResult};
use crate::indexer::EventIndexer;
use crate::metrics::OperatorMetrics;
use crate::types::{Commitment, EventFilter, RawEvent};
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::contract::EthEvent;
use ethers::types::U256;
use futures::future::{join_all, try_join_all};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

pub struct CommitmentReconciler {
    chains: Arc<ChainRegistry>,
    indexer: Arc<EventIndexer>,
    clock: Arc<dyn Clock>,
    lookback_blocks: u64,
    metrics: Arc<OperatorMetrics>,
}

impl CommitmentReconciler {
    pub fn new(
        chains: Arc<ChainRegistry>,
        indexer: Arc<EventIndexer>,
        clock: Arc<dyn Clock>,
        lookback_blocks: u64,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            chains,
            indexer,
            clock,
            lookback_blocks,
            metrics,
        }
    }

    /// Pending commitments of all chains, oldest escrow first. A chain that
    /// fails is logged and left out of this cycle.
    pub async fn pending_commitments(&self) -> Vec<Commitment> {
        let results = join_all(
            self.chains
                .iter()
                .map(|chain| async move { (chain, self.pending_for_chain(chain).await) }),
        )
        .await;

        let mut pending = Vec::new();
        for (chain, result) in results {
            match result {
                Ok(commitments) => {
                    self.metrics
                        .pending_commitments
                        .with_label_values(&[chain.name()])
                        .set(commitments.len() as i64);
                    pending.extend(commitments);
                }
                Err(e) => {
                    error!(
                        "[{}] Failed to reconcile commitments, skipping chain this cycle: {:?}",
                        chain.name(),
                        e
                    );
                    self.metrics
                        .reconcile_errors
                        .with_label_values(&[chain.name(), e.error_type()])
                        .inc();
                }
            }
        }
        sort_by_escrow_time(&mut pending);
        pending
    }

    pub async fn pending_for_chain(&self, chain: &ChainHandle) -> OperatorResult<Vec<Commitment>> {
        let client = chain.client.as_ref();
        let portal = chain.settings.portal_address;
        let latest = client.current_block().await?;
        let from_block = latest.saturating_sub(self.lookback_blocks);

        let escrowed_filter = EventFilter::new(EscrowedFilter::signature());
        let committed_filter = EventFilter::new(CommittedFilter::signature());
        let voided_filter = EventFilter::new(VoidedFilter::signature());
        let (escrowed, committed, voided, void_delay) = tokio::try_join!(
            self.indexer.fetch(client, portal, &escrowed_filter, from_block, latest),
            self.indexer.fetch(client, portal, &committed_filter, from_block, latest),
            self.indexer.fetch(client, portal, &voided_filter, from_block, latest),
            self.void_delay(chain),
        )?;

        let closed: HashSet<U256> = indices(&committed)?
            .chain(indices(&voided)?)
            .collect();
        // index -> escrow timestamp, duplicates collapse
        let mut escrows = BTreeMap::new();
        for event in &escrowed {
            escrows.insert(event.indexed_uint(0)?, event.indexed_uint(1)?);
        }

        let now = U256::from(self.clock.now());
        let candidates: Vec<U256> = escrows
            .into_iter()
            .filter(|(index, timestamp)| {
                !closed.contains(index) && timestamp.saturating_add(void_delay) > now
            })
            .map(|(index, _)| index)
            .collect();

        let snapshots = try_join_all(
            candidates
                .iter()
                .map(|index| self.read_commitment(chain, *index)),
        )
        .await?;
        let pending: Vec<Commitment> = snapshots
            .into_iter()
            .filter(|commitment| {
                if !commitment.is_pending() {
                    debug!(
                        "[{}] Commitment {} is {} on chain, dropping",
                        chain.name(),
                        commitment.index,
                        commitment.status.as_str()
                    );
                }
                commitment.is_pending()
            })
            .collect();

        info!(
            "[{}] {} escrows in blocks {}..={}, {} pending",
            chain.name(),
            escrowed.len(),
            from_block,
            latest,
            pending.len()
        );
        Ok(pending)
    }

    async fn void_delay(&self, chain: &ChainHandle) -> OperatorResult<U256> {
        let data = chain
            .client
            .read_state(chain.settings.portal_address, VoidDelayCall.encode().into())
            .await?;
        Ok(VoidDelayReturn::decode(data)?.0)
    }

    async fn read_commitment(&self, chain: &ChainHandle, index: U256) -> OperatorResult<Commitment> {
        let data = chain
            .client
            .read_state(chain.settings.portal_address, commitments_calldata(index))
            .await?;
        let commitment = decode_commitment(chain.settings.portal_kind, chain.settings.chain_id, &data)?;
        if commitment.index != index {
            return Err(OperatorError::DecodeError(format!(
                "asked for commitment {} but the portal returned {}",
                index, commitment.index
            )));
        }
        Ok(commitment)
    }
}

fn indices(events: &[RawEvent]) -> OperatorResult<impl Iterator<Item = U256>> {
    let indices = events
        .iter()
        .map(|event| event.indexed_uint(0))
        .collect::<OperatorResult<Vec<_>>>()?;
    Ok(indices.into_iter())
}

/// Oldest escrow first. Ties break on origin chain then index so the order is
/// the same on every run.
pub fn sort_by_escrow_time(commitments: &mut [Commitment]) {
    commitments.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.origin_chain_id.cmp(&b.origin_chain_id))
            .then(a.index.cmp(&b.index))
    });
}
