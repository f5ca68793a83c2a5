//! The slot keyspace.
//!
//! The cluster keyspace is divided into a fixed number of slots. Every
//! shard key maps to exactly one slot via CRC-16, and every slot is
//! owned by exactly one DagNode at any moment. Routing, migration, and
//! rebalancing all operate on slots, never on individual keys.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::{DagPoolError, DagPoolResult};

/// The total number of slots in the cluster keyspace.
pub const SLOT_COUNT: u16 = 16384;

lazy_static! {
    /// Lookup table for CRC-16/XMODEM (polynomial 0x1021, init 0).
    static ref CRC16_TABLE: [u16; 256] = build_crc16_table();
}

fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = (i as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
        *entry = crc;
    }
    table
}

/// Computes the CRC-16/XMODEM checksum of the input.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        let index = ((crc >> 8) ^ byte as u16) & 0xff;
        crc = (crc << 8) ^ CRC16_TABLE[index as usize];
    }
    crc
}

/// Returns the slot a key belongs to.
///
/// Deterministic and dependent only on the key bytes.
pub fn slot_of(key: impl AsRef<[u8]>) -> u16 {
    crc16(key.as_ref()) % SLOT_COUNT
}

/// An inclusive range of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Creates a validated slot range.
    pub fn new(start: u16, end: u16) -> DagPoolResult<Self> {
        if start > end || end >= SLOT_COUNT {
            return Err(DagPoolError::InvalidSlotRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }

    /// Number of slots covered by this range.
    pub fn count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Iterates over the slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Coalesces a sorted, deduplicated list of slots into inclusive ranges.
///
/// Used by `Status` reporting to render each DagNode's ownership
/// compactly.
pub fn coalesce_slots(slots: &[u16]) -> Vec<SlotRange> {
    let mut ranges: Vec<SlotRange> = Vec::new();

    for &slot in slots {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == slot => last.end = slot,
            _ => ranges.push(SlotRange {
                start: slot,
                end: slot,
            }),
        }
    }

    ranges
}
