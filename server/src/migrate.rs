//! Slot migration.
//!
//! Moving a slot from one DagNode to another goes through four
//! journaled phases. PREPARING repoints the slot table so new writes
//! land on the receiver while reads still fall back to the old owner.
//! COPYING streams the slot's blocks over. SWITCHING clears the
//! fallback pointer. DONE deletes the copies left on the old owner and
//! drops the journal entry. Every phase is idempotent, so crash
//! recovery is a plain replay of the journal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, QueryOrder};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use dagpool::block::{Cid, ShardKey};
use dagpool::slot::SlotRange;

use crate::database::entity::migration_journal::{
    self, Entity as MigrationJournal, MigrateState, MigrationJournalModel,
};
use crate::error::{ServerError, ServerResult};
use crate::pool::DagPoolService;
use crate::slots::SlotEntry;

/// Initial retry backoff for a failed migration step.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Upper bound for the retry backoff.
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Validates and journals a batch of slot moves, then wakes the
/// worker. Returns the number of slots scheduled.
pub(crate) async fn begin_migration(
    service: &DagPoolService,
    from: &str,
    to: &str,
    ranges: &[SlotRange],
) -> ServerResult<usize> {
    if from == to {
        return Err(ServerError::Conflict {
            reason: "migration source and destination are the same node".to_string(),
        });
    }
    service.dag_node(from)?;
    service.dag_node(to)?;

    // Validate the whole batch before touching anything.
    for range in ranges {
        for slot in range.iter() {
            let entry = service.slots().entry(slot)?;
            if entry.importing_from.is_some() {
                return Err(ServerError::Conflict {
                    reason: format!("slot {} is already migrating", slot),
                });
            }
            if entry.owner != from {
                return Err(ServerError::Conflict {
                    reason: format!("slot {} is owned by {}, not {}", slot, entry.owner, from),
                });
            }
        }
    }

    let mut scheduled = 0;
    for range in ranges {
        for slot in range.iter() {
            schedule_slot(service, slot, from, to).await?;
            scheduled += 1;
        }
    }

    if scheduled > 0 {
        service.migration_notify().notify_one();
    }

    Ok(scheduled)
}

/// Journals one slot move and repoints the slot table.
async fn schedule_slot(
    service: &DagPoolService,
    slot: u16,
    from: &str,
    to: &str,
) -> ServerResult<()> {
    let model = migration_journal::ActiveModel {
        slot: Set(slot as i32),
        from_node: Set(from.to_string()),
        to_node: Set(to.to_string()),
        state: Set(MigrateState::Preparing),
    };
    MigrationJournal::insert(model).exec(service.db()).await?;

    // From this point writes for the slot go to the receiver.
    service
        .slots()
        .set_entry(
            slot,
            SlotEntry {
                owner: to.to_string(),
                importing_from: Some(from.to_string()),
            },
        )
        .await?;

    set_journal_state(service.db(), slot as i32, MigrateState::Copying).await?;
    Ok(())
}

/// Schedules the minimal set of moves that evens out slot ownership.
pub(crate) async fn balance_slots(service: &DagPoolService) -> ServerResult<usize> {
    if service.slots().any_migrating() {
        return Err(ServerError::Conflict {
            reason: "a migration is already in progress".to_string(),
        });
    }

    let mut ownership: Vec<(String, Vec<u16>)> = Vec::new();
    let counts = service.slots().counts_by_owner();
    for name in service.registered_dag_nodes() {
        let slots = service.slots().owned_slots(&name);
        ownership.push((name, slots));
    }

    // A node in the counts map but not registered would lose data.
    for owner in counts.keys() {
        if !ownership.iter().any(|(name, _)| name == owner) {
            return Err(ServerError::Conflict {
                reason: format!("slot owner {} is not a registered DagNode", owner),
            });
        }
    }

    let moves = plan_balance(&mut ownership);
    let total = moves.len();

    for (slot, from, to) in moves {
        schedule_slot(service, slot, &from, &to).await?;
    }

    if total > 0 {
        service.migration_notify().notify_one();
    }

    Ok(total)
}

/// Computes the minimal move set toward an even distribution.
///
/// Nodes are processed in name order so the plan is deterministic;
/// surplus nodes shed their highest slots first.
pub(crate) fn plan_balance(ownership: &mut [(String, Vec<u16>)]) -> Vec<(u16, String, String)> {
    if ownership.is_empty() {
        return Vec::new();
    }

    ownership.sort_by(|a, b| a.0.cmp(&b.0));

    let total: usize = ownership.iter().map(|(_, slots)| slots.len()).sum();
    let nodes = ownership.len();
    let base = total / nodes;
    let remainder = total % nodes;

    // The first `remainder` nodes keep one extra slot.
    let targets: Vec<usize> = (0..nodes)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();

    let mut surplus: Vec<u16> = Vec::new();
    let mut donors: HashMap<u16, String> = HashMap::new();
    for (index, (name, slots)) in ownership.iter().enumerate() {
        if slots.len() > targets[index] {
            for &slot in &slots[targets[index]..] {
                surplus.push(slot);
                donors.insert(slot, name.clone());
            }
        }
    }

    let mut moves = Vec::with_capacity(surplus.len());
    let mut next = surplus.into_iter();
    for (index, (name, slots)) in ownership.iter().enumerate() {
        let mut deficit = targets[index].saturating_sub(slots.len());
        while deficit > 0 {
            match next.next() {
                Some(slot) => {
                    let from = donors[&slot].clone();
                    moves.push((slot, from, name.clone()));
                    deficit -= 1;
                }
                None => break,
            }
        }
    }

    moves
}

/// Runs the migration worker until canceled.
///
/// The worker drains the journal, then parks until a new migration is
/// scheduled.
pub async fn run_migration_worker(service: Arc<DagPoolService>, token: CancellationToken) {
    loop {
        if token.is_cancelled() {
            return;
        }

        match pending_migrations(service.db()).await {
            Ok(rows) if rows.is_empty() => {
                tokio::select! {
                    _ = service.migration_notify().notified() => {}
                    _ = token.cancelled() => return,
                }
            }
            Ok(rows) => {
                for row in rows {
                    drive_slot_with_retry(&service, row, &token).await;
                    if token.is_cancelled() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("failed to read the migration journal: {}", e);
                tokio::select! {
                    _ = sleep(BACKOFF_MAX) => {}
                    _ = token.cancelled() => return,
                }
            }
        }
    }
}

/// Drains the journal once, without retry.
///
/// Lets tests step the engine deterministically.
#[cfg(test)]
pub(crate) async fn drain_journal(service: &DagPoolService) -> ServerResult<()> {
    let token = CancellationToken::new();
    for row in pending_migrations(service.db()).await? {
        drive_slot(service, &row, &token).await?;
    }
    Ok(())
}

async fn pending_migrations(
    db: &DatabaseConnection,
) -> ServerResult<Vec<MigrationJournalModel>> {
    Ok(MigrationJournal::find()
        .order_by_asc(migration_journal::Column::Slot)
        .all(db)
        .await?)
}

/// Retries one slot's migration with exponential backoff until it
/// completes or the worker is canceled.
async fn drive_slot_with_retry(
    service: &DagPoolService,
    row: MigrationJournalModel,
    token: &CancellationToken,
) {
    let mut backoff = BACKOFF_INITIAL;

    loop {
        match drive_slot(service, &row, token).await {
            Ok(()) => return,
            Err(ServerError::Canceled) => return,
            Err(e) => {
                tracing::warn!(
                    slot = row.slot,
                    from = %row.from_node,
                    to = %row.to_node,
                    "migration step failed, retrying in {:?}: {}",
                    backoff,
                    e
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = token.cancelled() => return,
                }
                backoff = std::cmp::min(backoff * 2, BACKOFF_MAX);
            }
        }
    }
}

/// Drives one slot through its remaining phases.
#[instrument(skip_all, fields(slot = row.slot))]
async fn drive_slot(
    service: &DagPoolService,
    row: &MigrationJournalModel,
    token: &CancellationToken,
) -> ServerResult<()> {
    let slot = row.slot as u16;
    let from = service.dag_node(&row.from_node)?;
    let to = service.dag_node(&row.to_node)?;

    let mut state = current_journal_state(service.db(), row.slot).await?;

    loop {
        match state {
            MigrateState::Preparing => {
                service
                    .slots()
                    .set_entry(
                        slot,
                        SlotEntry {
                            owner: row.to_node.clone(),
                            importing_from: Some(row.from_node.clone()),
                        },
                    )
                    .await?;
                set_journal_state(service.db(), row.slot, MigrateState::Copying).await?;
                state = MigrateState::Copying;
            }

            MigrateState::Copying => {
                let keys = service.keys_in_slot(slot).await?;
                tracing::info!(count = keys.len(), "copying slot blocks");

                for key in keys {
                    if token.is_cancelled() {
                        return Err(ServerError::Canceled);
                    }

                    let cid = Cid::parse(&key)?;
                    let shard_key = ShardKey::of(&cid);

                    // Content addressing makes the copy idempotent: a
                    // block that already landed on the receiver (from
                    // a previous attempt or a concurrent write) is
                    // skipped.
                    if to.has_key(&shard_key).await {
                        continue;
                    }

                    match from.get(&cid).await {
                        Ok(block) => to.put(&block).await?,
                        // Deleted while we were copying.
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    }
                }

                set_journal_state(service.db(), row.slot, MigrateState::Switching).await?;
                state = MigrateState::Switching;
            }

            MigrateState::Switching => {
                service
                    .slots()
                    .set_entry(
                        slot,
                        SlotEntry {
                            owner: row.to_node.clone(),
                            importing_from: None,
                        },
                    )
                    .await?;
                set_journal_state(service.db(), row.slot, MigrateState::Done).await?;
                state = MigrateState::Done;
            }

            MigrateState::Done => {
                for key in service.keys_in_slot(slot).await? {
                    let cid = Cid::parse(&key)?;
                    if let Err(e) = from.delete(&cid).await {
                        if !e.is_not_found() {
                            tracing::warn!(key = %key, "failed to delete from the old owner: {}", e);
                        }
                    }
                }

                MigrationJournal::delete_by_id(row.slot)
                    .exec(service.db())
                    .await?;

                tracing::info!(from = %row.from_node, to = %row.to_node, "slot migrated");
                return Ok(());
            }
        }
    }
}

async fn current_journal_state(
    db: &DatabaseConnection,
    slot: i32,
) -> ServerResult<MigrateState> {
    MigrationJournal::find_by_id(slot)
        .one(db)
        .await?
        .map(|row| row.state)
        .ok_or_else(|| ServerError::Conflict {
            reason: format!("journal entry for slot {} vanished", slot),
        })
}

async fn set_journal_state(
    db: &DatabaseConnection,
    slot: i32,
    state: MigrateState,
) -> ServerResult<()> {
    let model = migration_journal::ActiveModel {
        slot: Set(slot),
        state: Set(state),
        ..Default::default()
    };
    MigrationJournal::update(model).exec(db).await?;
    Ok(())
}
