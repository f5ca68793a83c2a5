//! The DataNode service surface.
//!
//! [`DataNodeClient`] is what the cluster layer holds for each member
//! of a DagNode. The wire transport is not part of the core; a remote
//! client terminates the framing and implements this trait, while
//! [`LocalDataNode`] embeds the store directly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task;

use crate::error::{DataNodeError, DataNodeResult};
use crate::store::CaskStore;

/// Capacity of key enumeration channels.
const ALL_KEYS_CHANNEL_CAPACITY: usize = 256;

/// A handle to one DataNode.
#[async_trait]
pub trait DataNodeClient: Send + Sync + std::fmt::Debug {
    /// Stores a record.
    async fn put(&self, key: &str, meta: &[u8], value: &[u8]) -> DataNodeResult<()>;

    /// Retrieves a record as `(meta, value)`.
    async fn get(&self, key: &str) -> DataNodeResult<(Vec<u8>, Vec<u8>)>;

    /// Retrieves only the meta of a record.
    async fn get_meta(&self, key: &str) -> DataNodeResult<Vec<u8>>;

    /// Deletes a record. Absent keys are a no-op.
    async fn delete(&self, key: &str) -> DataNodeResult<()>;

    /// Deletes a batch of records.
    async fn delete_many(&self, keys: &[String]) -> DataNodeResult<()>;

    /// Stored size of the record in bytes.
    async fn size(&self, key: &str) -> DataNodeResult<u64>;

    /// Streams every live key on the node.
    async fn all_keys(&self) -> DataNodeResult<mpsc::Receiver<String>>;

    /// Liveness probe.
    async fn ping(&self) -> DataNodeResult<()>;
}

/// A DataNode embedded in the current process.
///
/// Store calls are disk-bound and synchronous, so they run on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct LocalDataNode {
    store: Arc<CaskStore>,
}

impl LocalDataNode {
    pub fn new(store: Arc<CaskStore>) -> Self {
        Self { store }
    }

    async fn run_blocking<T, F>(&self, f: F) -> DataNodeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&CaskStore) -> DataNodeResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DataNodeError::IoError {
                error: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?
    }
}

#[async_trait]
impl DataNodeClient for LocalDataNode {
    async fn put(&self, key: &str, meta: &[u8], value: &[u8]) -> DataNodeResult<()> {
        let key = key.to_string();
        let meta = meta.to_vec();
        let value = value.to_vec();
        self.run_blocking(move |store| store.put(&key, &meta, &value))
            .await
    }

    async fn get(&self, key: &str) -> DataNodeResult<(Vec<u8>, Vec<u8>)> {
        let key = key.to_string();
        self.run_blocking(move |store| store.get(&key)).await
    }

    async fn get_meta(&self, key: &str) -> DataNodeResult<Vec<u8>> {
        let key = key.to_string();
        self.run_blocking(move |store| store.get_meta(&key)).await
    }

    async fn delete(&self, key: &str) -> DataNodeResult<()> {
        let key = key.to_string();
        self.run_blocking(move |store| store.delete(&key)).await
    }

    async fn delete_many(&self, keys: &[String]) -> DataNodeResult<()> {
        let keys = keys.to_vec();
        self.run_blocking(move |store| {
            for key in &keys {
                store.delete(key)?;
            }
            Ok(())
        })
        .await
    }

    async fn size(&self, key: &str) -> DataNodeResult<u64> {
        let key = key.to_string();
        self.run_blocking(move |store| store.size(&key)).await
    }

    async fn all_keys(&self) -> DataNodeResult<mpsc::Receiver<String>> {
        let keys = self.run_blocking(move |store| Ok(store.all_keys())).await?;

        let (tx, rx) = mpsc::channel(ALL_KEYS_CHANNEL_CAPACITY);
        task::spawn(async move {
            for key in keys {
                if tx.send(key).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> DataNodeResult<()> {
        Ok(())
    }
}
