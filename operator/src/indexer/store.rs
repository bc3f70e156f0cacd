// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint stores for the event indexer

use crate::error::{OperatorError, OperatorResult};
use crate::types::{EventFilter, RawEvent};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Identifies one indexed event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub chain_id: u64,
    pub contract: Address,
    pub filter_hash: H256,
}

impl CheckpointKey {
    pub fn new(chain_id: u64, contract: Address, filter: &EventFilter) -> Self {
        Self {
            chain_id,
            contract,
            filter_hash: filter.hash(),
        }
    }

    /// Stable name usable as a file stem
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{:?}_{:?}",
            self.chain_id, self.contract, self.filter_hash
        )
    }
}

/// Cached progress for one stream. Safe to discard at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCheckpoint {
    /// Last block whose events are all in `events`
    pub last_block: Option<u64>,
    /// Events up to `last_block`, in chain order
    pub events: Vec<RawEvent>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &CheckpointKey) -> OperatorResult<Option<IndexCheckpoint>>;

    async fn put(&self, key: &CheckpointKey, checkpoint: &IndexCheckpoint) -> OperatorResult<()>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<CheckpointKey, IndexCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> OperatorResult<Option<IndexCheckpoint>> {
        Ok(self.checkpoints.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CheckpointKey, checkpoint: &IndexCheckpoint) -> OperatorResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(*key, checkpoint.clone());
        Ok(())
    }
}

/// One JSON file per key under `dir`. Writes go through a temporary file and a
/// rename so a crash never leaves a truncated checkpoint behind.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn new(dir: impl AsRef<Path>) -> OperatorResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> OperatorResult<Option<IndexCheckpoint>> {
        let path = self.path_for(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&content) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                // A corrupt cache is rebuilt from the chain
                debug!("Ignoring unreadable checkpoint {}: {:?}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &CheckpointKey, checkpoint: &IndexCheckpoint) -> OperatorResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec(checkpoint)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            OperatorError::StorageError(format!(
                "failed to move checkpoint into {}: {}",
                path.display(),
                e
            ))
        })
    }
}
