//! Utilities for testing.
//!
//! [`MockDataNode`] stands in for a remote member: an in-memory map
//! with switchable fault injection, so cluster-layer tests can take
//! members offline or make writes fail without touching a disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DataNodeError, DataNodeResult};
use crate::service::DataNodeClient;

/// An in-memory DataNode.
#[derive(Debug, Default)]
pub struct MockDataNode {
    records: Mutex<HashMap<String, (Vec<u8>, Vec<u8>)>>,

    /// When set, every operation fails with `Unreachable`.
    offline: AtomicBool,

    /// Number of upcoming `put` calls that fail with `Unreachable`.
    fail_puts: AtomicUsize,

    /// Total number of `put` calls attempted, failures included.
    put_attempts: AtomicUsize,
}

impl MockDataNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next_puts(&self, count: usize) {
        self.fail_puts.store(count, Ordering::SeqCst);
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.lock().unwrap().contains_key(key)
    }

    fn check_online(&self) -> DataNodeResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DataNodeError::Unreachable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataNodeClient for MockDataNode {
    async fn put(&self, key: &str, meta: &[u8], value: &[u8]) -> DataNodeResult<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let remaining = self
            .fail_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(DataNodeError::Unreachable);
        }

        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), (meta.to_vec(), value.to_vec()));
        Ok(())
    }

    async fn get(&self, key: &str) -> DataNodeResult<(Vec<u8>, Vec<u8>)> {
        self.check_online()?;
        self.records
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| DataNodeError::NotFound {
                key: key.to_string(),
            })
    }

    async fn get_meta(&self, key: &str) -> DataNodeResult<Vec<u8>> {
        Ok(self.get(key).await?.0)
    }

    async fn delete(&self, key: &str) -> DataNodeResult<()> {
        self.check_online()?;
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> DataNodeResult<()> {
        self.check_online()?;
        let mut records = self.records.lock().unwrap();
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }

    async fn size(&self, key: &str) -> DataNodeResult<u64> {
        self.check_online()?;
        self.records
            .lock()
            .unwrap()
            .get(key)
            .map(|(meta, value)| (meta.len() + value.len()) as u64)
            .ok_or_else(|| DataNodeError::NotFound {
                key: key.to_string(),
            })
    }

    async fn all_keys(&self) -> DataNodeResult<mpsc::Receiver<String>> {
        self.check_online()?;
        let keys: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for key in keys {
                if tx.send(key).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> DataNodeResult<()> {
        self.check_online()
    }
}
