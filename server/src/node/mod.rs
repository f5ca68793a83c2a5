//! DagNodes.
//!
//! A DagNode is a named group of `k + m` DataNodes over which blocks
//! are erasure-striped: shard `i` of every block lives on member `i`.
//! Writes are all-or-nothing with best-effort cleanup; reads race all
//! members and decode as soon as any `k` shards arrive.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use dagpool::block::{Block, Cid, ShardKey};
use dagpool::erasure::ErasureCodec;
use dagpool_datanode::{CaskStore, DataNodeClient, LocalDataNode, StoreConfig};

use crate::error::{ServerError, ServerResult};

/// Default deadline for shard reads.
const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(30);

lazy_static! {
    /// DagNode names: up to 64 ASCII alphanumerics, dashes, and
    /// underscores, starting with an alphanumeric.
    static ref NODE_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-_]{0,63}$").unwrap();
}

/// Configuration of one DagNode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DagNodeConfig {
    /// Name of the node.
    pub name: String,

    /// Number of data shards (`k`).
    #[serde(rename = "data-shards")]
    pub data_shards: usize,

    /// Number of parity shards (`m`).
    #[serde(rename = "parity-shards")]
    pub parity_shards: usize,

    /// The member DataNodes, one per shard position.
    pub members: Vec<MemberConfig>,
}

/// A member DataNode backend.
///
/// The closed set of backends the core can construct itself. A remote
/// gRPC member belongs to the transport layer, which injects its
/// client through [`DagNode::with_clients`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MemberConfig {
    /// A DataNode embedded in this process.
    Local {
        path: std::path::PathBuf,

        #[serde(rename = "cask-num")]
        #[serde(default)]
        cask_num: Option<u32>,
    },
}

impl DagNodeConfig {
    /// Validates the name and the erasure invariants.
    pub fn validate(&self) -> ServerResult<()> {
        if !NODE_NAME_REGEX.is_match(&self.name) {
            return Err(ServerError::Conflict {
                reason: format!("invalid DagNode name {:?}", self.name),
            });
        }

        let n = self.members.len();
        if self.data_shards < 1 {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {}: at least one data shard is required", self.name),
            });
        }
        if n < 2 {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {}: at least two members are required", self.name),
            });
        }
        if self.data_shards + self.parity_shards != n {
            return Err(ServerError::Conflict {
                reason: format!(
                    "DagNode {}: k + m = {} does not match the {} members",
                    self.name,
                    self.data_shards + self.parity_shards,
                    n
                ),
            });
        }
        Ok(())
    }
}

/// A group of DataNodes storing erasure-striped blocks.
#[derive(Debug)]
pub struct DagNode {
    name: String,
    data_shards: usize,
    parity_shards: usize,
    members: Vec<Arc<dyn DataNodeClient>>,
    read_deadline: Duration,
}

impl DagNode {
    /// Opens a DagNode, constructing each configured member backend.
    pub fn open(config: &DagNodeConfig, data_dir: &Path) -> ServerResult<Arc<Self>> {
        config.validate()?;

        let mut members: Vec<Arc<dyn DataNodeClient>> = Vec::with_capacity(config.members.len());
        for member in &config.members {
            match member {
                MemberConfig::Local { path, cask_num } => {
                    let path = if path.is_absolute() {
                        path.clone()
                    } else {
                        data_dir.join(path)
                    };
                    let mut store_config = StoreConfig::new(path);
                    if let Some(cask_num) = cask_num {
                        store_config.cask_num = *cask_num;
                    }
                    let store = CaskStore::open(store_config)?;
                    members.push(Arc::new(LocalDataNode::new(Arc::new(store))));
                }
            }
        }

        Ok(Arc::new(Self {
            name: config.name.clone(),
            data_shards: config.data_shards,
            parity_shards: config.parity_shards,
            members,
            read_deadline: DEFAULT_READ_DEADLINE,
        }))
    }

    /// Builds a DagNode over caller-supplied member clients.
    pub fn with_clients(
        name: impl Into<String>,
        data_shards: usize,
        parity_shards: usize,
        members: Vec<Arc<dyn DataNodeClient>>,
    ) -> ServerResult<Arc<Self>> {
        let name = name.into();
        if members.len() != data_shards + parity_shards || members.len() < 2 {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {}: invalid member count", name),
            });
        }
        Ok(Arc::new(Self {
            name,
            data_shards,
            parity_shards,
            members,
            read_deadline: DEFAULT_READ_DEADLINE,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Stores a block across all members.
    ///
    /// Success requires every member to accept its shard: erasure
    /// coding tolerates `m` failures on read, but a partial write
    /// would silently spend that budget up front. Each member put is
    /// retried once; if any member still fails, the shards already
    /// written are deleted best-effort and the write fails.
    pub async fn put(&self, block: &Block) -> ServerResult<()> {
        let codec = ErasureCodec::new(self.data_shards, self.parity_shards, block.len())?;
        let shards = codec.encode(block.data())?;
        let key = block.shard_key();
        let meta = encode_meta(block.len() as u32);

        let key = &key;
        let meta = &meta;
        let puts = self
            .members
            .iter()
            .zip(shards.iter())
            .map(|(member, shard)| async move {
                match member.put(key.as_str(), meta, shard).await {
                    Err(e) if e.is_transient() => member.put(key.as_str(), meta, shard).await,
                    result => result,
                }
            });
        let results = join_all(puts).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            let cleanups = self
                .members
                .iter()
                .zip(results.iter())
                .filter(|(_, result)| result.is_ok())
                .map(|(member, _)| member.delete(key.as_str()));
            for result in join_all(cleanups).await {
                if let Err(e) = result {
                    tracing::warn!(node = %self.name, key = %key, "cleanup delete failed: {}", e);
                }
            }

            return Err(ServerError::Unavailable {
                available: results.len() - failed,
                required: results.len(),
            });
        }

        Ok(())
    }

    /// Retrieves a block, decoding from the first `k` shards to
    /// arrive.
    pub async fn get(&self, cid: &Cid) -> ServerResult<Block> {
        let key = ShardKey::of(cid);

        let collected = timeout(self.read_deadline, self.collect_shards(&key)).await;
        let (shards, original_size, not_found) = match collected {
            Ok(result) => result,
            Err(_) => {
                return Err(ServerError::Unavailable {
                    available: 0,
                    required: self.data_shards,
                })
            }
        };

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            // Members answering NotFound unanimously mean the block is
            // simply absent, not that the node is degraded.
            if not_found >= self.members.len() - present {
                return Err(ServerError::NoSuchBlock);
            }
            return Err(ServerError::Unavailable {
                available: present,
                required: self.data_shards,
            });
        }

        let original_size = original_size.ok_or(ServerError::NoSuchBlock)? as usize;
        let codec = ErasureCodec::new(self.data_shards, self.parity_shards, original_size)?;
        let data = codec.decode(shards)?;

        // Hash-on-read: the decoded payload must match the CID.
        let block = Block::with_cid(cid.clone(), Bytes::from(data))?;
        Ok(block)
    }

    /// Gathers shards from all members, stopping at `k` successes.
    ///
    /// Outstanding member requests are canceled by dropping them.
    async fn collect_shards(
        &self,
        key: &ShardKey,
    ) -> (Vec<Option<Vec<u8>>>, Option<u32>, usize) {
        let mut requests: FuturesUnordered<_> = self
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| async move { (index, member.get(key.as_str()).await) })
            .collect();

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.members.len()];
        let mut original_size = None;
        let mut successes = 0;
        let mut not_found = 0;

        while let Some((index, result)) = requests.next().await {
            match result {
                Ok((meta, value)) => {
                    if original_size.is_none() {
                        original_size = decode_meta(&meta);
                    }
                    shards[index] = Some(value);
                    successes += 1;
                    if successes == self.data_shards {
                        break;
                    }
                }
                Err(e) => {
                    if matches!(e, dagpool_datanode::DataNodeError::NotFound { .. }) {
                        not_found += 1;
                    } else {
                        tracing::debug!(node = %self.name, member = index, "shard fetch failed: {}", e);
                    }
                }
            }
        }

        (shards, original_size, not_found)
    }

    /// Returns the original payload size recorded with the block.
    pub async fn get_size(&self, cid: &Cid) -> ServerResult<u32> {
        let key = ShardKey::of(cid);

        let mut not_found = 0;
        for member in &self.members {
            match member.get_meta(key.as_str()).await {
                Ok(meta) => {
                    if let Some(size) = decode_meta(&meta) {
                        return Ok(size);
                    }
                }
                Err(dagpool_datanode::DataNodeError::NotFound { .. }) => not_found += 1,
                Err(_) => {}
            }
        }

        if not_found == self.members.len() {
            Err(ServerError::NoSuchBlock)
        } else {
            Err(ServerError::Unavailable {
                available: 0,
                required: 1,
            })
        }
    }

    /// True when at least `k` members hold a shard of the key.
    pub async fn has_key(&self, key: &ShardKey) -> bool {
        let checks = self.members.iter().map(|member| member.size(key.as_str()));
        let present = join_all(checks)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        present >= self.data_shards
    }

    /// Deletes a block from all members.
    ///
    /// Succeeds once at least `k` members confirmed, at which point
    /// the block is no longer recoverable.
    pub async fn delete(&self, cid: &Cid) -> ServerResult<()> {
        self.delete_key(&ShardKey::of(cid)).await
    }

    pub async fn delete_key(&self, key: &ShardKey) -> ServerResult<()> {
        let deletes = self.members.iter().map(|member| member.delete(key.as_str()));
        let succeeded = join_all(deletes)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();

        if succeeded >= self.data_shards {
            Ok(())
        } else {
            Err(ServerError::Unavailable {
                available: succeeded,
                required: self.data_shards,
            })
        }
    }

    /// Rebuilds member `target`'s shards after a member replacement.
    ///
    /// Keys are enumerated from member `from`; for every key, `k`
    /// shards are read from randomly chosen healthy members and the
    /// target shard is reconstructed and written. Returns the number
    /// of repaired keys.
    pub async fn repair(&self, from: usize, target: usize) -> ServerResult<u64> {
        if from >= self.members.len() || target >= self.members.len() {
            return Err(ServerError::Conflict {
                reason: format!("member index out of range for DagNode {}", self.name),
            });
        }
        if from == target {
            return Err(ServerError::Conflict {
                reason: "repair source and target are the same member".to_string(),
            });
        }
        if self.parity_shards == 0 {
            return Err(ServerError::Conflict {
                reason: format!("DagNode {} has no parity to repair from", self.name),
            });
        }

        let mut keys = self.members[from].all_keys().await?;
        let mut repaired = 0u64;

        while let Some(key) = keys.recv().await {
            match self.repair_key(&key, target).await {
                Ok(()) => repaired += 1,
                Err(e) => {
                    tracing::warn!(node = %self.name, key = %key, "repair failed: {}", e);
                }
            }
        }

        Ok(repaired)
    }

    async fn repair_key(&self, key: &str, target: usize) -> ServerResult<()> {
        // Read k shards from random members, excluding the target.
        let mut sources: Vec<usize> = (0..self.members.len()).filter(|&i| i != target).collect();
        sources.shuffle(&mut rand::thread_rng());

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.members.len()];
        let mut meta = None;
        let mut collected = 0;
        for index in sources {
            if collected == self.data_shards {
                break;
            }
            if let Ok((member_meta, value)) = self.members[index].get(key).await {
                if meta.is_none() {
                    meta = Some(member_meta);
                }
                shards[index] = Some(value);
                collected += 1;
            }
        }

        if collected < self.data_shards {
            return Err(ServerError::Unavailable {
                available: collected,
                required: self.data_shards,
            });
        }

        let meta = meta.unwrap_or_default();
        let original_size = decode_meta(&meta).ok_or_else(|| ServerError::Conflict {
            reason: format!("malformed meta for key {}", key),
        })?;

        let codec = ErasureCodec::new(self.data_shards, self.parity_shards, original_size as usize)?;
        let rebuilt = codec.reconstruct(shards, &[target])?;
        self.members[target].put(key, &meta, &rebuilt[0]).await?;

        Ok(())
    }

    /// A DagNode is healthy iff at least `k` members answer a ping.
    pub async fn healthy(&self) -> bool {
        let pings = self.members.iter().map(|member| member.ping());
        let alive = join_all(pings)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        alive >= self.data_shards
    }
}

fn encode_meta(original_size: u32) -> [u8; 4] {
    original_size.to_le_bytes()
}

fn decode_meta(meta: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = meta.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
