//! Reed–Solomon erasure coding.
//!
//! Blocks are striped across the members of a DagNode as `k` data
//! shards plus `m` parity shards over GF(2^8). The generator matrix is
//! the crate's Vandermonde construction; all members of one cluster
//! must use the same construction, so the choice is fixed here and not
//! configurable.

#[cfg(test)]
mod tests;

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{DagPoolError, DagPoolResult};

/// A `(k, m)` erasure codec for one block size.
///
/// The codec is cheap to construct and is built per block, since the
/// shard length depends on the payload length.
pub struct ErasureCodec {
    data_shards: usize,
    parity_shards: usize,
    block_size: usize,
    shard_size: usize,

    /// The underlying codec. Absent when `m == 0`, in which case
    /// encoding is a bare split and nothing can be reconstructed.
    inner: Option<ReedSolomon>,
}

impl std::fmt::Debug for ErasureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureCodec")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .field("block_size", &self.block_size)
            .field("shard_size", &self.shard_size)
            .finish_non_exhaustive()
    }
}

impl ErasureCodec {
    /// Creates a codec for a block of `block_size` bytes.
    pub fn new(data_shards: usize, parity_shards: usize, block_size: usize) -> DagPoolResult<Self> {
        if data_shards < 1 {
            return Err(DagPoolError::InvalidErasureParams {
                k: data_shards,
                m: parity_shards,
                reason: "at least one data shard is required",
            });
        }
        if data_shards + parity_shards < 2 {
            return Err(DagPoolError::InvalidErasureParams {
                k: data_shards,
                m: parity_shards,
                reason: "a DagNode must have at least two members",
            });
        }
        if data_shards + parity_shards > 256 {
            return Err(DagPoolError::InvalidErasureParams {
                k: data_shards,
                m: parity_shards,
                reason: "GF(2^8) supports at most 256 shards",
            });
        }

        let inner = if parity_shards > 0 {
            let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|_| {
                DagPoolError::InvalidErasureParams {
                    k: data_shards,
                    m: parity_shards,
                    reason: "rejected by the codec",
                }
            })?;
            Some(rs)
        } else {
            None
        };

        // Zero-length payloads still need one byte per shard so that
        // every member stores a record.
        let shard_size = std::cmp::max(1, block_size.div_ceil(data_shards));

        Ok(Self {
            data_shards,
            parity_shards,
            block_size,
            shard_size,
            inner,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Length of every shard produced by `encode`.
    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Splits `data` into `k + m` equal-length shards.
    ///
    /// The payload is zero-padded to `k * shard_size`; the padding is
    /// trimmed again on decode using the recorded block size.
    pub fn encode(&self, data: &[u8]) -> DagPoolResult<Vec<Vec<u8>>> {
        if data.len() != self.block_size {
            return Err(DagPoolError::CorruptRecord {
                reason: format!(
                    "payload length {} does not match codec block size {}",
                    data.len(),
                    self.block_size
                ),
            });
        }

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());
        for i in 0..self.data_shards {
            let start = std::cmp::min(i * self.shard_size, data.len());
            let end = std::cmp::min(start + self.shard_size, data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(self.shard_size, 0);
            shards.push(shard);
        }
        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; self.shard_size]);
        }

        if let Some(rs) = &self.inner {
            rs.encode(&mut shards).map_err(|e| DagPoolError::CorruptRecord {
                reason: format!("encode failed: {}", e),
            })?;
        }

        Ok(shards)
    }

    /// Recovers the original payload from at least `k` present shards.
    ///
    /// Missing shards are `None`. The reconstructed data shards are
    /// verified against the parity before the payload is returned.
    pub fn decode(&self, mut shards: Vec<Option<Vec<u8>>>) -> DagPoolResult<Vec<u8>> {
        if shards.len() != self.total_shards() {
            return Err(DagPoolError::CorruptRecord {
                reason: format!(
                    "expected {} shard positions, got {}",
                    self.total_shards(),
                    shards.len()
                ),
            });
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            return Err(DagPoolError::ShardsUnavailable {
                available: present,
                required: self.data_shards,
            });
        }

        if let Some(rs) = &self.inner {
            if present < self.total_shards() {
                rs.reconstruct(&mut shards)
                    .map_err(|e| DagPoolError::CorruptRecord {
                        reason: format!("reconstruct failed: {}", e),
                    })?;
            }

            let filled: Vec<&Vec<u8>> = shards.iter().map(|s| s.as_ref().unwrap()).collect();
            let ok = rs.verify(&filled).map_err(|e| DagPoolError::CorruptRecord {
                reason: format!("verify failed: {}", e),
            })?;
            if !ok {
                return Err(DagPoolError::CorruptRecord {
                    reason: "parity verification failed".to_string(),
                });
            }
        }

        let mut data = Vec::with_capacity(self.data_shards * self.shard_size);
        for shard in shards.iter().take(self.data_shards) {
            match shard {
                Some(shard) => data.extend_from_slice(shard),
                None => {
                    return Err(DagPoolError::ShardsUnavailable {
                        available: present,
                        required: self.data_shards,
                    })
                }
            }
        }

        data.truncate(self.block_size);
        Ok(data)
    }

    /// Checks parity consistency of a full shard set.
    pub fn verify(&self, shards: &[Vec<u8>]) -> DagPoolResult<bool> {
        match &self.inner {
            Some(rs) => rs.verify(shards).map_err(|e| DagPoolError::CorruptRecord {
                reason: format!("verify failed: {}", e),
            }),
            None => Ok(true),
        }
    }

    /// Rebuilds the shards at `targets` from the present subset.
    ///
    /// Returns the reconstructed shards in the order of `targets`.
    pub fn reconstruct(
        &self,
        mut shards: Vec<Option<Vec<u8>>>,
        targets: &[usize],
    ) -> DagPoolResult<Vec<Vec<u8>>> {
        let rs = self.inner.as_ref().ok_or(DagPoolError::InvalidErasureParams {
            k: self.data_shards,
            m: self.parity_shards,
            reason: "cannot reconstruct without parity shards",
        })?;

        if shards.len() != self.total_shards() {
            return Err(DagPoolError::CorruptRecord {
                reason: format!(
                    "expected {} shard positions, got {}",
                    self.total_shards(),
                    shards.len()
                ),
            });
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            return Err(DagPoolError::ShardsUnavailable {
                available: present,
                required: self.data_shards,
            });
        }

        rs.reconstruct(&mut shards)
            .map_err(|e| DagPoolError::CorruptRecord {
                reason: format!("reconstruct failed: {}", e),
            })?;

        let mut rebuilt = Vec::with_capacity(targets.len());
        for &target in targets {
            let shard = shards
                .get(target)
                .and_then(|s| s.clone())
                .ok_or_else(|| DagPoolError::CorruptRecord {
                    reason: format!("target shard index {} out of range", target),
                })?;
            rebuilt.push(shard);
        }

        Ok(rebuilt)
    }
}
