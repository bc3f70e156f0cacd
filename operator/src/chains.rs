// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::ChainClient;
use crate::config::ChainSettings;
use crate::error::{OperatorError, OperatorResult};
use crate::policy::{build_policy, AuthorizationPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the operator knows about one configured chain.
pub struct ChainHandle {
    pub settings: ChainSettings,
    pub client: Arc<dyn ChainClient>,
    /// Rules for calls executed on this chain
    pub policy: AuthorizationPolicy,
}

impl ChainHandle {
    pub fn new(settings: ChainSettings, client: Arc<dyn ChainClient>) -> Self {
        let policy = build_policy(&settings);
        Self {
            settings,
            client,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }
}

/// Chains by id. Built once at startup and shared read-only.
#[derive(Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, Arc<ChainHandle>>,
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("chain_ids", &self.chains.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ChainHandle) -> OperatorResult<()> {
        let chain_id = handle.settings.chain_id;
        if handle.client.chain_id() != chain_id {
            return Err(OperatorError::ConfigError(format!(
                "[{}] client serves chain {} but settings say {}",
                handle.name(),
                handle.client.chain_id(),
                chain_id
            )));
        }
        if self.chains.contains_key(&chain_id) {
            return Err(OperatorError::ConfigError(format!(
                "chain {} registered twice",
                chain_id
            )));
        }
        self.chains.insert(chain_id, Arc::new(handle));
        Ok(())
    }

    pub fn with_chain(
        mut self,
        settings: ChainSettings,
        client: Arc<dyn ChainClient>,
    ) -> OperatorResult<Self> {
        self.insert(ChainHandle::new(settings, client))?;
        Ok(self)
    }

    pub fn get(&self, chain_id: u64) -> Option<Arc<ChainHandle>> {
        self.chains.get(&chain_id).cloned()
    }

    pub fn require(&self, chain_id: u64) -> OperatorResult<Arc<ChainHandle>> {
        self.get(chain_id)
            .ok_or(OperatorError::UnknownChain(chain_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChainHandle>> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
