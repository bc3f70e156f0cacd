// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::{ChainClient, EthChainClient};
use crate::chains::{ChainHandle, ChainRegistry};
use crate::config::{ChainSettings, OperatorNodeConfig};
use crate::indexer::{CheckpointStore, EventIndexer, FileCheckpointStore, InMemoryCheckpointStore};
use crate::metrics::OperatorMetrics;
use crate::operator::Operator;
use crate::reconciler::{CommitmentReconciler, SystemClock};
use crate::relay::RelayExecutor;
use crate::retry_with_max_elapsed_time;
use crate::server::{run_server, OperatorPublicMetadata};
use ethers::signers::Signer;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wires the configured chains into an operator and runs it until `cancel`
/// fires, or for a single poll cycle when `once` is set.
pub async fn run_operator_node(
    config: OperatorNodeConfig,
    version: &'static str,
    prometheus_registry: prometheus::Registry,
    once: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;
    let metrics = Arc::new(OperatorMetrics::new(&prometheus_registry));
    let wallet = config.load_operator_wallet()?;
    info!("Operator address: {:?}", wallet.address());

    let max_retry_duration = config.max_retry_duration;
    let chains = connect_chains(&config.chains, |settings| {
        let wallet = wallet.clone();
        let metrics = metrics.clone();
        async move {
            let client = retry_with_max_elapsed_time!(
                EthChainClient::new(settings, wallet.clone(), metrics.clone()),
                max_retry_duration
            )
            .and_then(|result| result)?;
            Ok::<Arc<dyn ChainClient>, anyhow::Error>(Arc::new(client))
        }
    })
    .await?;
    let chains = Arc::new(chains);

    let store = build_checkpoint_store(config.checkpoint_dir.as_deref()).await?;
    let indexer = Arc::new(EventIndexer::new(
        store,
        config.indexer_settings(),
        metrics.clone(),
    ));
    let reconciler = CommitmentReconciler::new(
        chains.clone(),
        indexer,
        Arc::new(SystemClock),
        config.lookback_blocks,
        metrics.clone(),
    );
    let relay = RelayExecutor::new(chains.clone(), config.relay_settings(), metrics.clone());
    let operator = Operator::new(
        chains.clone(),
        reconciler,
        relay,
        config.poll_interval,
        metrics,
    );

    let server_handle = match config.metrics_port {
        Some(port) => {
            let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
            let metadata = OperatorPublicMetadata {
                version,
                operator_address: format!("{:?}", wallet.address()),
                chains: chains.iter().map(|chain| chain.settings.chain_id).collect(),
            };
            Some(run_server(&socket_address, prometheus_registry, metadata).await?)
        }
        None => None,
    };

    if once {
        let report = operator.run_once().await;
        info!("Single poll cycle done: {:?}", report);
    } else {
        operator.run(cancel).await;
    }

    if let Some(handle) = server_handle {
        handle.abort();
    }
    Ok(())
}

/// Connects every configured chain. A chain that cannot be reached is logged
/// and left out, so only a node with no reachable chain refuses to start.
async fn connect_chains<'a, F, Fut>(
    settings: &'a [ChainSettings],
    connect: F,
) -> anyhow::Result<ChainRegistry>
where
    F: Fn(&'a ChainSettings) -> Fut,
    Fut: Future<Output = anyhow::Result<Arc<dyn ChainClient>>>,
{
    let mut chains = ChainRegistry::new();
    for chain in settings {
        let client = match connect(chain).await {
            Ok(client) => client,
            Err(e) => {
                error!(
                    "[{}] Failed to connect to {}, relaying without this chain: {:?}",
                    chain.name, chain.rpc_url, e
                );
                continue;
            }
        };
        info!(
            "[{}] Connected to chain {} at {}",
            client.chain_name(),
            chain.chain_id,
            chain.rpc_url
        );
        chains.insert(ChainHandle::new(chain.clone(), client))?;
    }
    if chains.is_empty() {
        return Err(anyhow::anyhow!(
            "None of the {} configured chains could be reached",
            settings.len()
        ));
    }
    Ok(chains)
}

async fn build_checkpoint_store(dir: Option<&Path>) -> anyhow::Result<Arc<dyn CheckpointStore>> {
    Ok(match dir {
        Some(dir) => {
            info!("Persisting index checkpoints under {}", dir.display());
            Arc::new(FileCheckpointStore::new(dir).await?)
        }
        None => {
            info!("No checkpoint-dir configured, index checkpoints stay in memory");
            Arc::new(InMemoryCheckpointStore::new())
        }
    })
}
