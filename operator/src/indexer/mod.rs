// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Windowed event retrieval with resumable checkpoints.
//!
//! The indexer splits a block range into windows no larger than
//! `max_block_range`, remembers how far it got for each
//! `(chain, contract, filter)` stream and resumes from there on the next call.
//! Only blocks at least `finality_depth` behind the requested head are ever
//! written to the checkpoint, so a reorg near the tip is re-read rather than
//! served from cache.

pub mod store;

pub use store::{
    CheckpointKey, CheckpointStore, FileCheckpointStore, IndexCheckpoint, InMemoryCheckpointStore,
};

use crate::chain_client::ChainClient;
use crate::error::{OperatorError, OperatorResult};
use crate::metrics::OperatorMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::{EventFilter, RawEvent};
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Largest block span requested from a provider in one query
    pub max_block_range: u64,
    /// Blocks behind the requested head that are considered final
    pub finality_depth: u64,
    /// Upper bound for retrying a single window query
    pub max_retry_duration: Duration,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            max_block_range: 3_500,
            finality_depth: 16,
            max_retry_duration: Duration::from_secs(10),
        }
    }
}

pub struct EventIndexer {
    store: Arc<dyn CheckpointStore>,
    settings: IndexerSettings,
    metrics: Arc<OperatorMetrics>,
}

impl EventIndexer {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        settings: IndexerSettings,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            store,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Returns every event of `contract` matching `filter` in `[from_block, to_block]`,
    /// in chain order.
    ///
    /// Cached events below `from_block` are pruned from the checkpoint. A window
    /// that fails after retries aborts the call but keeps the progress of the
    /// windows before it.
    pub async fn fetch(
        &self,
        client: &dyn ChainClient,
        contract: Address,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> OperatorResult<Vec<RawEvent>> {
        let chain = client.chain_name().to_string();
        let key = CheckpointKey::new(client.chain_id(), contract, filter);
        let cached = self.store.get(&key).await?.unwrap_or_default();

        let cached_len = cached.events.len();
        let mut events: Vec<RawEvent> = cached
            .events
            .into_iter()
            .filter(|event| event.block_number >= from_block)
            .collect();
        let mut persisted_through = cached.last_block;
        if events.len() < cached_len {
            debug!(
                "[{}] Pruned {} cached events below block {} for {:?}",
                chain,
                cached_len - events.len(),
                from_block,
                contract
            );
            self.store
                .put(
                    &key,
                    &IndexCheckpoint {
                        last_block: persisted_through,
                        events: events.clone(),
                    },
                )
                .await?;
        }

        let mut start = match persisted_through {
            Some(last) => from_block.max(last.saturating_add(1)),
            None => from_block,
        };
        let safe_block = to_block.saturating_sub(self.settings.finality_depth);
        let window = self.settings.max_block_range.max(1);

        while start <= to_block {
            let end = start.saturating_add(window - 1).min(to_block);
            let batch = retry_with_max_elapsed_time!(
                client.query_events(contract, filter, start, end),
                self.settings.max_retry_duration
            )
            .and_then(|result| result)?;

            let covered = batch.last_block.min(end);
            if covered < start {
                return Err(OperatorError::IndexerNoProgress {
                    chain_id: client.chain_id(),
                    from_block: start,
                });
            }
            if covered < end {
                debug!(
                    "[{}] Provider covered blocks {}..={} of {}..={}, continuing from {}",
                    chain,
                    start,
                    covered,
                    start,
                    end,
                    covered + 1
                );
            }

            let before = events.len();
            events.extend(
                batch
                    .events
                    .into_iter()
                    .filter(|event| event.block_number >= start && event.block_number <= covered),
            );
            self.metrics
                .indexer_fetched_events
                .with_label_values(&[&chain])
                .inc_by((events.len() - before) as u64);

            let finalized_through = covered.min(safe_block);
            if finalized_through >= start {
                persisted_through = Some(finalized_through);
                self.store
                    .put(
                        &key,
                        &IndexCheckpoint {
                            last_block: persisted_through,
                            events: events
                                .iter()
                                .filter(|event| event.block_number <= finalized_through)
                                .cloned()
                                .collect(),
                        },
                    )
                    .await?;
            }

            self.metrics
                .last_indexed_block
                .with_label_values(&[&chain, &format!("{:?}", contract)])
                .set(covered as i64);
            start = covered + 1;
        }

        // The cache may run ahead of a head that moved backwards
        events.retain(|event| event.block_number <= to_block);
        info!(
            "[{}] Indexed {} events for {:?} in blocks {}..={}",
            chain,
            events.len(),
            contract,
            from_block,
            to_block
        );
        Ok(events)
    }
}
