//! Append-only cask files.
//!
//! A cask is a vlog/hint file pair. The vlog holds the records, the
//! hint mirrors their positions so the in-memory index can be rebuilt
//! without scanning values.
//!
//! vlog record: `[crc32:4][key_len:4][value_len:4][key][value]`, CRC
//! over key + value. hint record: `[key_len:4][value_len:4]
//! [value_pos:8][key]`. All integers little-endian. A record with
//! `value_len == 0` is a tombstone.
//!
//! Appends go vlog first, hint second; a hint missing its vlog record
//! at the tail is healed from the vlog on open.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::error::{DataNodeError, DataNodeResult};

const VLOG_HEADER_LEN: u64 = 12;
const HINT_HEADER_LEN: u64 = 16;

/// Sanity bounds applied while replaying files. Anything beyond these
/// is treated as corruption.
const MAX_KEY_LEN: u32 = 4096;
const MAX_VALUE_LEN: u32 = 64 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    value_pos: u64,
    value_len: u32,
}

#[derive(Debug)]
struct CaskFiles {
    vlog: File,
    hint: File,
    vlog_len: u64,
    hint_len: u64,
}

/// A single-writer append log with a resident index.
#[derive(Debug)]
pub(crate) struct Cask {
    id: u32,
    sync: bool,
    files: Mutex<CaskFiles>,
    reader: File,
    index: RwLock<HashMap<String, IndexEntry>>,
}

impl Cask {
    /// Opens a cask, rebuilding the index from hint + vlog.
    ///
    /// Corrupt vlog suffixes are truncated; hint entries not covered
    /// by the vlog are dropped and missing hint entries are appended.
    pub(crate) fn open(id: u32, vlog_path: &Path, hint_path: &Path, sync: bool) -> DataNodeResult<Self> {
        let vlog = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(vlog_path)?;
        let hint = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(hint_path)?;
        let reader = File::open(vlog_path)?;

        let vlog_disk_len = vlog.metadata()?.len();

        let mut index = HashMap::new();
        let (mut scan_pos, mut hint_len) = replay_hint(&hint, vlog_disk_len, &mut index)?;
        let replayed_hint_len = hint_len;

        // Scan the vlog suffix the hint does not cover, healing the
        // hint as we go.
        let mut truncated = false;
        while scan_pos < vlog_disk_len {
            match read_vlog_record(&vlog, scan_pos, vlog_disk_len)? {
                Some(record) => {
                    let hint_buf = encode_hint_record(&record.key, record.value_len, record.value_pos);
                    hint.write_all_at(&hint_buf, hint_len)?;
                    hint_len += hint_buf.len() as u64;

                    apply_record(&mut index, record.key, record.value_pos, record.value_len);
                    scan_pos = record.end;
                }
                None => {
                    tracing::warn!(
                        cask_id = id,
                        pos = scan_pos,
                        "truncating vlog at corrupt or torn record"
                    );
                    vlog.set_len(scan_pos)?;
                    truncated = true;
                    break;
                }
            }
        }

        if truncated || hint_len != replayed_hint_len || hint.metadata()?.len() != hint_len {
            hint.set_len(hint_len)?;
            hint.sync_data()?;
            vlog.sync_data()?;
        }

        Ok(Self {
            id,
            sync,
            files: Mutex::new(CaskFiles {
                vlog,
                hint,
                vlog_len: scan_pos,
                hint_len,
            }),
            reader,
            index: RwLock::new(index),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Appends a record for `key`.
    ///
    /// Re-putting a key with an identical value is a no-op: the CRC of
    /// the resident record is compared before writing.
    pub(crate) fn put(&self, key: &str, value: &[u8]) -> DataNodeResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN as usize {
            return Err(DataNodeError::Corrupt {
                cask_id: self.id,
                reason: format!("invalid key length {}", key.len()),
            });
        }
        if value.is_empty() || value.len() > MAX_VALUE_LEN as usize {
            return Err(DataNodeError::Corrupt {
                cask_id: self.id,
                reason: format!("invalid value length {}", value.len()),
            });
        }

        let crc = record_crc(key.as_bytes(), value);

        let mut files = self.files.lock().unwrap();

        if let Some(existing) = self.lookup(key) {
            if existing.value_len as usize == value.len() {
                if let Ok(resident) = self.read_value(key, existing) {
                    if record_crc(key.as_bytes(), &resident) == crc {
                        return Ok(());
                    }
                }
            }
        }

        let value_pos = files.vlog_len + VLOG_HEADER_LEN + key.len() as u64;

        let mut vlog_buf =
            Vec::with_capacity(VLOG_HEADER_LEN as usize + key.len() + value.len());
        vlog_buf.extend_from_slice(&crc.to_le_bytes());
        vlog_buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        vlog_buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        vlog_buf.extend_from_slice(key.as_bytes());
        vlog_buf.extend_from_slice(value);

        files.vlog.write_all_at(&vlog_buf, files.vlog_len)?;
        if self.sync {
            files.vlog.sync_data()?;
        }
        files.vlog_len += vlog_buf.len() as u64;

        let hint_buf = encode_hint_record(key, value.len() as u32, value_pos);
        files.hint.write_all_at(&hint_buf, files.hint_len)?;
        if self.sync {
            files.hint.sync_data()?;
        }
        files.hint_len += hint_buf.len() as u64;

        self.index.write().unwrap().insert(
            key.to_string(),
            IndexEntry {
                value_pos,
                value_len: value.len() as u32,
            },
        );

        Ok(())
    }

    /// Reads the value for `key`, verifying the record CRC.
    pub(crate) fn get(&self, key: &str) -> DataNodeResult<Vec<u8>> {
        let entry = self.lookup(key).ok_or_else(|| DataNodeError::NotFound {
            key: key.to_string(),
        })?;

        let value = self.read_value(key, entry)?;

        let mut header = [0u8; 4];
        let header_pos = entry.value_pos - key.len() as u64 - VLOG_HEADER_LEN;
        self.reader.read_exact_at(&mut header, header_pos)?;
        let stored_crc = u32::from_le_bytes(header);

        if record_crc(key.as_bytes(), &value) != stored_crc {
            return Err(DataNodeError::Corrupt {
                cask_id: self.id,
                reason: format!("crc mismatch for key {}", key),
            });
        }

        Ok(value)
    }

    /// Reads `len` bytes of the value at `offset` without CRC
    /// verification. Used for meta prefix reads.
    pub(crate) fn read_value_prefix(
        &self,
        key: &str,
        offset: u64,
        len: usize,
    ) -> DataNodeResult<Vec<u8>> {
        let entry = self.lookup(key).ok_or_else(|| DataNodeError::NotFound {
            key: key.to_string(),
        })?;

        if offset + len as u64 > entry.value_len as u64 {
            return Err(DataNodeError::Corrupt {
                cask_id: self.id,
                reason: format!("prefix read beyond value for key {}", key),
            });
        }

        let mut buf = vec![0u8; len];
        self.reader.read_exact_at(&mut buf, entry.value_pos + offset)?;
        Ok(buf)
    }

    /// Appends a tombstone and drops the key from the index.
    ///
    /// Deleting an absent key is a no-op.
    pub(crate) fn delete(&self, key: &str) -> DataNodeResult<()> {
        let mut files = self.files.lock().unwrap();

        if self.lookup(key).is_none() {
            return Ok(());
        }

        let crc = record_crc(key.as_bytes(), &[]);
        let value_pos = files.vlog_len + VLOG_HEADER_LEN + key.len() as u64;

        let mut vlog_buf = Vec::with_capacity(VLOG_HEADER_LEN as usize + key.len());
        vlog_buf.extend_from_slice(&crc.to_le_bytes());
        vlog_buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        vlog_buf.extend_from_slice(&0u32.to_le_bytes());
        vlog_buf.extend_from_slice(key.as_bytes());

        files.vlog.write_all_at(&vlog_buf, files.vlog_len)?;
        if self.sync {
            files.vlog.sync_data()?;
        }
        files.vlog_len += vlog_buf.len() as u64;

        let hint_buf = encode_hint_record(key, 0, value_pos);
        files.hint.write_all_at(&hint_buf, files.hint_len)?;
        if self.sync {
            files.hint.sync_data()?;
        }
        files.hint_len += hint_buf.len() as u64;

        self.index.write().unwrap().remove(key);

        Ok(())
    }

    pub(crate) fn size(&self, key: &str) -> DataNodeResult<u64> {
        self.lookup(key)
            .map(|e| e.value_len as u64)
            .ok_or_else(|| DataNodeError::NotFound {
                key: key.to_string(),
            })
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.index.read().unwrap().keys().cloned().collect()
    }

    fn lookup(&self, key: &str) -> Option<IndexEntry> {
        self.index.read().unwrap().get(key).copied()
    }

    fn read_value(&self, key: &str, entry: IndexEntry) -> DataNodeResult<Vec<u8>> {
        let mut buf = vec![0u8; entry.value_len as usize];
        self.reader
            .read_exact_at(&mut buf, entry.value_pos)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    DataNodeError::Corrupt {
                        cask_id: self.id,
                        reason: format!("short read for key {}", key),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(buf)
    }
}

fn record_crc(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn encode_hint_record(key: &str, value_len: u32, value_pos: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HINT_HEADER_LEN as usize + key.len());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&value_len.to_le_bytes());
    buf.extend_from_slice(&value_pos.to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf
}

fn apply_record(index: &mut HashMap<String, IndexEntry>, key: String, value_pos: u64, value_len: u32) {
    if value_len == 0 {
        index.remove(&key);
    } else {
        index.insert(
            key,
            IndexEntry {
                value_pos,
                value_len,
            },
        );
    }
}

/// Replays the hint file into `index`.
///
/// Returns the vlog position the hint covers and the length of the
/// valid hint prefix. Replay stops at the first record that is torn or
/// refers beyond the vlog; the caller rescans the vlog from the
/// returned position.
fn replay_hint(
    hint: &File,
    vlog_len: u64,
    index: &mut HashMap<String, IndexEntry>,
) -> DataNodeResult<(u64, u64)> {
    let hint_disk_len = hint.metadata()?.len();

    let mut buf = vec![0u8; hint_disk_len as usize];
    hint.read_exact_at(&mut buf, 0)?;

    let mut pos: u64 = 0;
    let mut covered: u64 = 0;

    while pos + HINT_HEADER_LEN <= hint_disk_len {
        let at = pos as usize;
        let key_len = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let value_len = u32::from_le_bytes(buf[at + 4..at + 8].try_into().unwrap());
        let value_pos = u64::from_le_bytes(buf[at + 8..at + 16].try_into().unwrap());

        if key_len == 0 || key_len > MAX_KEY_LEN || value_len > MAX_VALUE_LEN {
            break;
        }

        let record_end = pos + HINT_HEADER_LEN + key_len as u64;
        if record_end > hint_disk_len {
            break;
        }

        // The record this hint describes must be fully on disk.
        if value_pos + value_len as u64 > vlog_len {
            break;
        }

        let key_bytes = &buf[at + HINT_HEADER_LEN as usize..record_end as usize];
        let key = match std::str::from_utf8(key_bytes) {
            Ok(k) => k.to_string(),
            Err(_) => break,
        };

        apply_record(index, key, value_pos, value_len);
        covered = value_pos + value_len as u64;
        pos = record_end;
    }

    Ok((covered, pos))
}

struct VlogRecord {
    key: String,
    value_pos: u64,
    value_len: u32,
    end: u64,
}

/// Reads and CRC-checks the vlog record starting at `pos`.
///
/// Returns `None` when the record is torn or fails its CRC; the caller
/// truncates the vlog there.
fn read_vlog_record(vlog: &File, pos: u64, vlog_len: u64) -> DataNodeResult<Option<VlogRecord>> {
    if pos + VLOG_HEADER_LEN > vlog_len {
        return Ok(None);
    }

    let mut header = [0u8; VLOG_HEADER_LEN as usize];
    vlog.read_exact_at(&mut header, pos)?;

    let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let key_len = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let value_len = u32::from_le_bytes(header[8..12].try_into().unwrap());

    if key_len == 0 || key_len > MAX_KEY_LEN || value_len > MAX_VALUE_LEN {
        return Ok(None);
    }

    let value_pos = pos + VLOG_HEADER_LEN + key_len as u64;
    let end = value_pos + value_len as u64;
    if end > vlog_len {
        return Ok(None);
    }

    let mut payload = vec![0u8; key_len as usize + value_len as usize];
    vlog.read_exact_at(&mut payload, pos + VLOG_HEADER_LEN)?;

    let (key_bytes, value_bytes) = payload.split_at(key_len as usize);
    if record_crc(key_bytes, value_bytes) != crc {
        return Ok(None);
    }

    let key = match std::str::from_utf8(key_bytes) {
        Ok(k) => k.to_string(),
        Err(_) => return Ok(None),
    };

    Ok(Some(VlogRecord {
        key,
        value_pos,
        value_len,
        end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_cask(dir: &Path, sync: bool) -> Cask {
        Cask::open(
            0,
            &dir.join("00000000.vlog"),
            &dir.join("00000000.hint"),
            sync,
        )
        .unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cask = open_cask(dir.path(), true);

        cask.put("alpha", b"first value").unwrap();
        cask.put("beta", b"second value").unwrap();

        assert_eq!(cask.get("alpha").unwrap(), b"first value");
        assert_eq!(cask.get("beta").unwrap(), b"second value");
        assert_eq!(cask.size("alpha").unwrap(), 11);

        assert!(matches!(
            cask.get("gamma"),
            Err(DataNodeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_overwrite_updates_index() {
        let dir = tempfile::tempdir().unwrap();
        let cask = open_cask(dir.path(), true);

        cask.put("key", b"old").unwrap();
        cask.put("key", b"newer value").unwrap();

        assert_eq!(cask.get("key").unwrap(), b"newer value");
    }

    #[test]
    fn test_identical_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cask = open_cask(dir.path(), true);

        cask.put("key", b"value").unwrap();
        let len_after_first = cask.files.lock().unwrap().vlog_len;

        cask.put("key", b"value").unwrap();
        let len_after_second = cask.files.lock().unwrap().vlog_len;

        assert_eq!(len_after_first, len_after_second);
    }

    #[test]
    fn test_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let cask = open_cask(dir.path(), true);

        cask.put("key", b"value").unwrap();
        cask.delete("key").unwrap();

        assert!(!cask.contains("key"));
        assert!(matches!(
            cask.get("key"),
            Err(DataNodeError::NotFound { .. })
        ));

        // Deleting again is a no-op.
        cask.delete("key").unwrap();
    }

    #[test]
    fn test_reopen_replays_hint() {
        let dir = tempfile::tempdir().unwrap();

        {
            let cask = open_cask(dir.path(), true);
            cask.put("alpha", b"one").unwrap();
            cask.put("beta", b"two").unwrap();
            cask.delete("alpha").unwrap();
        }

        let cask = open_cask(dir.path(), true);
        assert!(!cask.contains("alpha"));
        assert_eq!(cask.get("beta").unwrap(), b"two");
    }

    #[test]
    fn test_reopen_without_hint_rebuilds() {
        let dir = tempfile::tempdir().unwrap();

        {
            let cask = open_cask(dir.path(), true);
            cask.put("alpha", b"one").unwrap();
            cask.put("beta", b"two").unwrap();
        }

        std::fs::remove_file(dir.path().join("00000000.hint")).unwrap();

        let cask = open_cask(dir.path(), true);
        assert_eq!(cask.get("alpha").unwrap(), b"one");
        assert_eq!(cask.get("beta").unwrap(), b"two");

        // The hint was regenerated.
        let hint_len = std::fs::metadata(dir.path().join("00000000.hint"))
            .unwrap()
            .len();
        assert!(hint_len > 0);
    }

    #[test]
    fn test_torn_vlog_record_is_truncated() {
        let dir = tempfile::tempdir().unwrap();

        {
            let cask = open_cask(dir.path(), true);
            for i in 0..10 {
                cask.put(&format!("key-{}", i), format!("value-{}", i).as_bytes())
                    .unwrap();
            }
        }

        // Simulate a crash mid-write: chop the last record in half and
        // drop the hint so recovery goes through the vlog.
        let vlog_path = dir.path().join("00000000.vlog");
        let full_len = std::fs::metadata(&vlog_path).unwrap().len();
        let vlog = OpenOptions::new().write(true).open(&vlog_path).unwrap();
        vlog.set_len(full_len - 5).unwrap();
        drop(vlog);
        std::fs::remove_file(dir.path().join("00000000.hint")).unwrap();

        let cask = open_cask(dir.path(), true);
        for i in 0..9 {
            assert_eq!(
                cask.get(&format!("key-{}", i)).unwrap(),
                format!("value-{}", i).as_bytes()
            );
        }
        assert!(!cask.contains("key-9"));

        // The torn suffix is gone from disk.
        assert!(std::fs::metadata(&vlog_path).unwrap().len() < full_len - 5);
    }

    #[test]
    fn test_corrupt_record_truncates_suffix() {
        let dir = tempfile::tempdir().unwrap();

        let boundary;
        {
            let cask = open_cask(dir.path(), true);
            cask.put("good", b"kept").unwrap();
            boundary = cask.files.lock().unwrap().vlog_len;
            cask.put("bad", b"flipped").unwrap();
            cask.put("after", b"also dropped").unwrap();
        }

        // Flip a bit inside the second record's value.
        let vlog_path = dir.path().join("00000000.vlog");
        let mut contents = std::fs::read(&vlog_path).unwrap();
        let target = boundary as usize + VLOG_HEADER_LEN as usize + 3 + 1;
        contents[target] ^= 0xff;
        std::fs::write(&vlog_path, &contents).unwrap();
        std::fs::remove_file(dir.path().join("00000000.hint")).unwrap();

        let cask = open_cask(dir.path(), true);
        assert_eq!(cask.get("good").unwrap(), b"kept");
        assert!(!cask.contains("bad"));
        assert!(!cask.contains("after"));

        assert_eq!(
            std::fs::metadata(&vlog_path).unwrap().len(),
            boundary
        );
    }

    #[test]
    fn test_torn_hint_healed_from_vlog() {
        let dir = tempfile::tempdir().unwrap();

        {
            let cask = open_cask(dir.path(), true);
            cask.put("alpha", b"one").unwrap();
            cask.put("beta", b"two").unwrap();
        }

        // Chop the hint mid-record; the vlog is intact.
        let hint_path = dir.path().join("00000000.hint");
        let hint_len = std::fs::metadata(&hint_path).unwrap().len();
        let hint = OpenOptions::new().write(true).open(&hint_path).unwrap();
        hint.set_len(hint_len - 3).unwrap();
        drop(hint);

        let cask = open_cask(dir.path(), true);
        assert_eq!(cask.get("alpha").unwrap(), b"one");
        assert_eq!(cask.get("beta").unwrap(), b"two");

        // The hint is whole again.
        assert_eq!(std::fs::metadata(&hint_path).unwrap().len(), hint_len);
    }
}
