//! The cask store.
//!
//! A store is a fixed modulus of casks inside one repo directory. Keys
//! route to casks by CRC-32, each cask has a single writer, and the
//! value of every record carries a small meta prefix so that sidecar
//! info can be read without touching the shard bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::cask::Cask;
use crate::error::{DataNodeError, DataNodeResult};
use crate::repo::{self, RepoLock};

/// Default number of casks per store.
pub const DEFAULT_CASK_NUM: u32 = 256;

/// Length of the meta prefix header inside record values.
const META_LEN_PREFIX: usize = 4;

/// Configuration for one cask store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// The repo directory.
    pub path: PathBuf,

    /// Cask modulus. Must not change for the lifetime of a repo.
    pub cask_num: u32,

    /// Whether appends are fsync'd at every commit point.
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cask_num: DEFAULT_CASK_NUM,
            sync_writes: true,
        }
    }
}

/// An on-disk shard store.
///
/// All methods are synchronous; the service layer runs them on the
/// blocking pool.
#[derive(Debug)]
pub struct CaskStore {
    config: StoreConfig,
    casks: RwLock<HashMap<u32, Arc<Cask>>>,
    _lock: RepoLock,
}

impl CaskStore {
    /// Opens a store, recovering every cask already present in the
    /// repo.
    pub fn open(config: StoreConfig) -> DataNodeResult<Self> {
        if config.cask_num == 0 {
            return Err(DataNodeError::InvalidRepo {
                path: config.path.clone(),
                reason: "cask modulus must be nonzero".to_string(),
            });
        }

        let lock = repo::open_repo(&config.path)?;

        let mut casks = HashMap::new();
        for entry in std::fs::read_dir(&config.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".vlog") else {
                continue;
            };
            let Ok(id) = stem.parse::<u32>() else { continue };

            if id >= config.cask_num {
                return Err(DataNodeError::InvalidRepo {
                    path: config.path.clone(),
                    reason: format!(
                        "cask {} exceeds the configured modulus {}",
                        id, config.cask_num
                    ),
                });
            }

            let cask = Cask::open(
                id,
                &repo::vlog_path(&config.path, id),
                &repo::hint_path(&config.path, id),
                config.sync_writes,
            )?;
            casks.insert(id, Arc::new(cask));
        }

        Ok(Self {
            config,
            casks: RwLock::new(casks),
            _lock: lock,
        })
    }

    /// Routes a key to its cask id.
    pub fn cask_id(&self, key: &str) -> u32 {
        crc32fast::hash(key.as_bytes()) % self.config.cask_num
    }

    /// Stores a record.
    pub fn put(&self, key: &str, meta: &[u8], value: &[u8]) -> DataNodeResult<()> {
        let cask = self.cask(self.cask_id(key), true)?;

        let mut buf = Vec::with_capacity(META_LEN_PREFIX + meta.len() + value.len());
        buf.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        buf.extend_from_slice(meta);
        buf.extend_from_slice(value);

        cask.put(key, &buf)
    }

    /// Retrieves a record as `(meta, value)`.
    pub fn get(&self, key: &str) -> DataNodeResult<(Vec<u8>, Vec<u8>)> {
        let cask = self.cask_for_read(key)?;
        let buf = cask.get(key)?;
        split_meta(&buf, cask.id(), key)
    }

    /// Retrieves only the meta of a record.
    pub fn get_meta(&self, key: &str) -> DataNodeResult<Vec<u8>> {
        let cask = self.cask_for_read(key)?;

        let header = cask.read_value_prefix(key, 0, META_LEN_PREFIX)?;
        let meta_len = u32::from_le_bytes(header.try_into().unwrap()) as usize;

        cask.read_value_prefix(key, META_LEN_PREFIX as u64, meta_len)
    }

    /// Writes a tombstone for the key. Absent keys are a no-op.
    pub fn delete(&self, key: &str) -> DataNodeResult<()> {
        match self.cask_for_read(key) {
            Ok(cask) => cask.delete(key),
            Err(DataNodeError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stored size of the record value (meta prefix included).
    pub fn size(&self, key: &str) -> DataNodeResult<u64> {
        self.cask_for_read(key)?.size(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cask_for_read(key)
            .map(|cask| cask.contains(key))
            .unwrap_or(false)
    }

    /// Snapshot of every live key across all casks.
    pub fn all_keys(&self) -> Vec<String> {
        let casks: Vec<Arc<Cask>> = self.casks.read().unwrap().values().cloned().collect();

        let mut keys = Vec::new();
        for cask in casks {
            keys.extend(cask.keys());
        }
        keys
    }

    fn cask(&self, id: u32, create: bool) -> DataNodeResult<Arc<Cask>> {
        if let Some(cask) = self.casks.read().unwrap().get(&id) {
            return Ok(cask.clone());
        }

        if !create {
            return Err(DataNodeError::NotFound {
                key: String::new(),
            });
        }

        let mut casks = self.casks.write().unwrap();
        // Raced with another creator.
        if let Some(cask) = casks.get(&id) {
            return Ok(cask.clone());
        }

        let cask = Arc::new(Cask::open(
            id,
            &repo::vlog_path(&self.config.path, id),
            &repo::hint_path(&self.config.path, id),
            self.config.sync_writes,
        )?);
        casks.insert(id, cask.clone());
        Ok(cask)
    }

    fn cask_for_read(&self, key: &str) -> DataNodeResult<Arc<Cask>> {
        self.cask(self.cask_id(key), false)
            .map_err(|e| match e {
                DataNodeError::NotFound { .. } => DataNodeError::NotFound {
                    key: key.to_string(),
                },
                other => other,
            })
    }
}

fn split_meta(buf: &[u8], cask_id: u32, key: &str) -> DataNodeResult<(Vec<u8>, Vec<u8>)> {
    if buf.len() < META_LEN_PREFIX {
        return Err(DataNodeError::Corrupt {
            cask_id,
            reason: format!("record for key {} is shorter than the meta header", key),
        });
    }

    let meta_len = u32::from_le_bytes(buf[..META_LEN_PREFIX].try_into().unwrap()) as usize;
    if META_LEN_PREFIX + meta_len > buf.len() {
        return Err(DataNodeError::Corrupt {
            cask_id,
            reason: format!("meta length of key {} exceeds the record", key),
        });
    }

    let meta = buf[META_LEN_PREFIX..META_LEN_PREFIX + meta_len].to_vec();
    let value = buf[META_LEN_PREFIX + meta_len..].to_vec();
    Ok((meta, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    use dagpool::testing::get_fake_data;

    fn open_store(path: &std::path::Path) -> CaskStore {
        let mut config = StoreConfig::new(path);
        config.cask_num = 8;
        CaskStore::open(config).unwrap()
    }

    #[test]
    fn test_put_get_with_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.put("key-1", b"\x0a\x00\x00\x00", b"shard bytes").unwrap();

        let (meta, value) = store.get("key-1").unwrap();
        assert_eq!(meta, b"\x0a\x00\x00\x00");
        assert_eq!(value, b"shard bytes");

        assert_eq!(store.get_meta("key-1").unwrap(), b"\x0a\x00\x00\x00");
        assert_eq!(store.size("key-1").unwrap(), 4 + 4 + 11);
    }

    #[test]
    fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(matches!(
            store.get("nope"),
            Err(DataNodeError::NotFound { .. })
        ));
        assert!(!store.contains("nope"));

        // Deleting an absent key is a no-op.
        store.delete("nope").unwrap();
    }

    #[test]
    fn test_keys_spread_across_casks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let mut cask_ids = std::collections::HashSet::new();
        for i in 0..64 {
            let key = format!("key-{}", i);
            store.put(&key, b"", b"x").unwrap();
            cask_ids.insert(store.cask_id(&key));
        }

        assert!(cask_ids.len() > 1);

        let mut keys = store.all_keys();
        keys.sort();
        assert_eq!(keys.len(), 64);
    }

    #[test]
    fn test_reopen_recovers_all_casks() {
        let dir = tempfile::tempdir().unwrap();
        let payload = get_fake_data(1024);

        {
            let store = open_store(dir.path());
            for i in 0..32 {
                store
                    .put(&format!("key-{}", i), b"meta", &payload)
                    .unwrap();
            }
            store.delete("key-7").unwrap();
        }

        let store = open_store(dir.path());
        assert!(!store.contains("key-7"));
        for i in 0..32 {
            if i == 7 {
                continue;
            }
            let (meta, value) = store.get(&format!("key-{}", i)).unwrap();
            assert_eq!(meta, b"meta");
            assert_eq!(value, payload);
        }
    }

    #[test]
    fn test_modulus_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        // Pick a key that lands in a cask id the smaller modulus
        // cannot produce.
        let key = (0..)
            .map(|i| format!("key-{}", i))
            .find(|k| crc32fast::hash(k.as_bytes()) % 256 >= 8)
            .unwrap();

        {
            let mut config = StoreConfig::new(dir.path());
            config.cask_num = 256;
            let store = CaskStore::open(config).unwrap();
            store.put(&key, b"", b"x").unwrap();
        }

        let mut config = StoreConfig::new(dir.path());
        config.cask_num = 8;
        assert!(matches!(
            CaskStore::open(config),
            Err(DataNodeError::InvalidRepo { .. })
        ));
    }
}
