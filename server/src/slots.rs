//! The slot table.
//!
//! The in-memory routing table for all 16,384 slots, backed by the
//! `slot` table. Readers grab an immutable snapshot through an `Arc`
//! swap; every mutation rewrites the affected row first and publishes
//! a fresh snapshot after, so a crash can lose at most an in-flight
//! mutation, never tear one. Mutations are serialized by the single
//! writer that owns this table (the service and its migration task).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::DatabaseConnection;

use dagpool::slot::{coalesce_slots, SlotRange, SLOT_COUNT};

use crate::database::entity::slot::{self, Entity as Slot};
use crate::error::{ServerError, ServerResult};

/// Ownership of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    /// Name of the owning DagNode.
    pub owner: String,

    /// The previous owner while the slot is migrating.
    pub importing_from: Option<String>,
}

/// The slot→DagNode routing table.
#[derive(Debug)]
pub struct SlotTable {
    db: DatabaseConnection,
    snapshot: RwLock<Arc<Vec<SlotEntry>>>,
}

impl SlotTable {
    /// Loads the table from the database.
    ///
    /// An empty database yields an uninitialized table; the caller
    /// assigns the keyspace with [`SlotTable::assign_all`] once the
    /// first DagNode is known.
    pub async fn load(db: DatabaseConnection) -> ServerResult<Self> {
        let rows = Slot::find().all(&db).await?;

        let entries = if rows.is_empty() {
            Vec::new()
        } else {
            if rows.len() != SLOT_COUNT as usize {
                return Err(ServerError::Conflict {
                    reason: format!(
                        "slot table holds {} rows, expected {}",
                        rows.len(),
                        SLOT_COUNT
                    ),
                });
            }

            let mut entries = vec![
                SlotEntry {
                    owner: String::new(),
                    importing_from: None,
                };
                SLOT_COUNT as usize
            ];
            for row in rows {
                let index = row.slot as usize;
                entries[index] = SlotEntry {
                    owner: row.owner,
                    importing_from: row.importing_from,
                };
            }

            if entries.iter().any(|e| e.owner.is_empty()) {
                return Err(ServerError::Conflict {
                    reason: "slot table does not cover the keyspace".to_string(),
                });
            }

            entries
        };

        Ok(Self {
            db,
            snapshot: RwLock::new(Arc::new(entries)),
        })
    }

    /// True when the keyspace has not been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().unwrap().is_empty()
    }

    /// Returns the current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Vec<SlotEntry>> {
        self.snapshot.read().unwrap().clone()
    }

    /// Returns the entry for one slot.
    pub fn entry(&self, slot: u16) -> ServerResult<SlotEntry> {
        let snapshot = self.snapshot();
        snapshot
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| ServerError::Conflict {
                reason: "the cluster keyspace is not initialized".to_string(),
            })
    }

    /// Assigns the entire keyspace to one DagNode.
    ///
    /// Used at cluster init when the first node is registered.
    pub async fn assign_all(&self, owner: &str) -> ServerResult<()> {
        if !self.is_empty() {
            return Err(ServerError::Conflict {
                reason: "the keyspace is already assigned".to_string(),
            });
        }

        // Insert in chunks to stay within SQLite's bind limit.
        for chunk in (0..SLOT_COUNT).collect::<Vec<_>>().chunks(256) {
            let models = chunk.iter().map(|&slot| slot::ActiveModel {
                slot: Set(slot as i32),
                owner: Set(owner.to_string()),
                importing_from: Set(None),
            });
            Slot::insert_many(models).exec(&self.db).await?;
        }

        let entries = vec![
            SlotEntry {
                owner: owner.to_string(),
                importing_from: None,
            };
            SLOT_COUNT as usize
        ];
        *self.snapshot.write().unwrap() = Arc::new(entries);

        Ok(())
    }

    /// Rewrites one slot and publishes the new snapshot.
    pub async fn set_entry(&self, slot: u16, entry: SlotEntry) -> ServerResult<()> {
        if self.is_empty() {
            return Err(ServerError::Conflict {
                reason: "the cluster keyspace is not initialized".to_string(),
            });
        }

        let model = slot::ActiveModel {
            slot: Set(slot as i32),
            owner: Set(entry.owner.clone()),
            importing_from: Set(entry.importing_from.clone()),
        };
        Slot::update(model).exec(&self.db).await?;

        // Copy-on-write: the table is only cloned when a reader still
        // holds the previous snapshot.
        let mut guard = self.snapshot.write().unwrap();
        Arc::make_mut(&mut guard)[slot as usize] = entry;

        Ok(())
    }

    /// Slots currently owned by a DagNode, ascending.
    pub fn owned_slots(&self, owner: &str) -> Vec<u16> {
        self.snapshot()
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(slot, _)| slot as u16)
            .collect()
    }

    /// Coalesced slot ranges per DagNode, for status reporting.
    pub fn ranges_by_owner(&self) -> Vec<(String, Vec<SlotRange>)> {
        let snapshot = self.snapshot();

        let mut by_owner: HashMap<&str, Vec<u16>> = HashMap::new();
        for (slot, entry) in snapshot.iter().enumerate() {
            by_owner.entry(&entry.owner).or_default().push(slot as u16);
        }

        let mut result: Vec<(String, Vec<SlotRange>)> = by_owner
            .into_iter()
            .map(|(owner, slots)| (owner.to_string(), coalesce_slots(&slots)))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Number of slots owned per DagNode.
    pub fn counts_by_owner(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.snapshot().iter() {
            *counts.entry(entry.owner.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// True when any slot is mid-migration.
    pub fn any_migrating(&self) -> bool {
        self.snapshot().iter().any(|e| e.importing_from.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::database::test_database;

    #[tokio::test]
    async fn test_init_and_reload() {
        let db = test_database().await;

        let table = SlotTable::load(db.clone()).await.unwrap();
        assert!(table.is_empty());
        assert!(table.entry(0).is_err());

        table.assign_all("alpha").await.unwrap();
        assert_eq!(table.entry(16383).unwrap().owner, "alpha");
        assert_eq!(table.owned_slots("alpha").len(), SLOT_COUNT as usize);

        // A second process sees the same assignment.
        let reloaded = SlotTable::load(db).await.unwrap();
        assert_eq!(reloaded.entry(7).unwrap().owner, "alpha");
    }

    #[tokio::test]
    async fn test_double_assign_conflicts() {
        let db = test_database().await;

        let table = SlotTable::load(db).await.unwrap();
        table.assign_all("alpha").await.unwrap();

        assert!(matches!(
            table.assign_all("beta").await,
            Err(ServerError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_entry_publishes_snapshot() {
        let db = test_database().await;

        let table = SlotTable::load(db.clone()).await.unwrap();
        table.assign_all("alpha").await.unwrap();

        let before = table.snapshot();

        table
            .set_entry(
                7,
                SlotEntry {
                    owner: "beta".to_string(),
                    importing_from: Some("alpha".to_string()),
                },
            )
            .await
            .unwrap();

        // The old snapshot is untouched; the new one sees the change.
        assert_eq!(before[7].owner, "alpha");
        let entry = table.entry(7).unwrap();
        assert_eq!(entry.owner, "beta");
        assert_eq!(entry.importing_from.as_deref(), Some("alpha"));
        assert!(table.any_migrating());

        // And it is durable.
        let reloaded = SlotTable::load(db).await.unwrap();
        assert_eq!(reloaded.entry(7).unwrap().owner, "beta");
    }

    #[tokio::test]
    async fn test_ranges_by_owner() {
        let db = test_database().await;

        let table = SlotTable::load(db).await.unwrap();
        table.assign_all("alpha").await.unwrap();

        for slot in [5u16, 6, 7, 100] {
            table
                .set_entry(
                    slot,
                    SlotEntry {
                        owner: "beta".to_string(),
                        importing_from: None,
                    },
                )
                .await
                .unwrap();
        }

        let ranges = table.ranges_by_owner();
        assert_eq!(ranges.len(), 2);

        let (ref beta, ref beta_ranges) = ranges[1];
        assert_eq!(beta, "beta");
        assert_eq!(
            beta_ranges,
            &vec![
                SlotRange { start: 5, end: 7 },
                SlotRange {
                    start: 100,
                    end: 100
                }
            ]
        );

        let counts = table.counts_by_owner();
        assert_eq!(counts["beta"], 4);
        assert_eq!(counts["alpha"], SLOT_COUNT as usize - 4);
    }
}
