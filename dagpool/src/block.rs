//! Content-addressed blocks.
//!
//! A block is an immutable `(cid, payload)` pair. The CID is the typed
//! SHA-256 hash of the payload, so equal payloads always yield equal
//! CIDs. Blocks are bounded in size by the upstream chunker; the pool
//! itself never splits or merges payloads.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DagPoolError, DagPoolResult};
use crate::hash::Hash;

/// A content identifier.
///
/// Self-describing: the canonical string form is the typed hash of the
/// payload (e.g., `sha256:baea...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(Hash);

impl Cid {
    /// Computes the CID of a payload.
    pub fn from_data(data: &[u8]) -> Self {
        Self(Hash::sha256_from_bytes(data))
    }

    /// Parses a CID from its canonical string form.
    pub fn parse(s: &str) -> DagPoolResult<Self> {
        Ok(Self(Hash::from_typed(s)?))
    }

    pub fn hash(&self) -> &Hash {
        &self.0
    }
}

impl std::str::FromStr for Cid {
    type Err = DagPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_typed_base16())
    }
}

/// The local key of a block inside a DataNode.
///
/// SHA-256 of the CID string, rendered as lowercase hex. This is also
/// the input to slot assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    pub fn of(cid: &Cid) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(cid.to_string().as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        Self(hex::encode(digest))
    }

    /// Wraps an already-computed shard key.
    ///
    /// Used when keys come back from a DataNode enumeration.
    pub fn from_raw(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<[u8]> for ShardKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// An immutable block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Creates a block, computing its CID from the payload.
    pub fn new(data: Bytes) -> Self {
        let cid = Cid::from_data(&data);
        Self { cid, data }
    }

    /// Creates a block with a caller-supplied CID, verifying it.
    pub fn with_cid(cid: Cid, data: Bytes) -> DagPoolResult<Self> {
        if Cid::from_data(&data) != cid {
            return Err(DagPoolError::HashMismatch {
                cid: cid.to_string(),
            });
        }
        Ok(Self { cid, data })
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the shard key under which this block is stored.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::of(&self.cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_payloads_equal_cids() {
        let a = Block::new(Bytes::from_static(b"HELLOWORLD"));
        let b = Block::new(Bytes::from_static(b"HELLOWORLD"));
        assert_eq!(a.cid(), b.cid());

        let c = Block::new(Bytes::from_static(b"helloworld"));
        assert_ne!(a.cid(), c.cid());
    }

    #[test]
    fn test_with_cid_verifies() {
        let block = Block::new(Bytes::from_static(b"HELLOWORLD"));
        let cid = block.cid().clone();

        assert!(Block::with_cid(cid.clone(), Bytes::from_static(b"HELLOWORLD")).is_ok());

        let err = Block::with_cid(cid, Bytes::from_static(b"tampered")).unwrap_err();
        assert!(matches!(err, DagPoolError::HashMismatch { .. }));
    }

    #[test]
    fn test_shard_key_is_stable() {
        let block = Block::new(Bytes::from_static(b"123456"));
        let key = block.shard_key();

        assert_eq!(key, ShardKey::of(block.cid()));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.as_str(), key.as_str().to_lowercase());
    }
}
