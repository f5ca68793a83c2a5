//! Garbage collection.
//!
//! The collector periodically walks every key the cluster knows about
//! and deletes the blocks that are neither pinned nor cached. Pinning
//! writers interrupt the running cycle; the per-key lock in the
//! reference counter makes the final check-and-delete safe against a
//! pin racing in.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::ServerResult;
use crate::pool::DagPoolService;

/// Cooperative interruption of the collector.
#[derive(Debug, Default)]
pub struct GcControl {
    interrupt: AtomicBool,
}

impl GcControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the running cycle to abort before its next candidate.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    fn begin_cycle(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

/// Runs garbage collection periodically until canceled.
pub async fn run_garbage_collection(service: Arc<DagPoolService>, token: CancellationToken) {
    let period = service.config().gc_period();

    if period == Duration::ZERO {
        // disabled
        return;
    }

    loop {
        tokio::select! {
            _ = time::sleep(period) => {}
            _ = token.cancelled() => return,
        }

        // We don't stop even if it errors
        if let Err(e) = run_garbage_collection_once(&service).await {
            tracing::warn!("Garbage collection failed: {}", e);
        }
    }
}

/// Runs one collection cycle.
///
/// Returns the number of blocks deleted. A cycle aborted by an
/// interrupt is not an error: every deletion already performed was for
/// a key whose refcount was zero under its lock at decision time.
#[instrument(skip_all)]
pub async fn run_garbage_collection_once(service: &DagPoolService) -> ServerResult<u64> {
    tracing::info!("Running garbage collection...");

    let control = service.gc_control();
    control.begin_cycle();

    // Candidates: everything the slot index knows, plus the cache set
    // (which should be a subset, but membership is what protects a
    // block, not indexing).
    let mut candidates: BTreeSet<String> = service.all_indexed_keys().await?.into_iter().collect();
    candidates.extend(service.cache_set().iter().await?);

    let mut deleted = 0u64;
    let mut kept = 0u64;

    for key in candidates {
        if control.interrupted() {
            tracing::info!("Garbage collection interrupted by a pinning writer");
            break;
        }

        // Serialize against IncrOrCreate on the same key.
        let _guard = service.ref_counter().lock_key(&key).await;

        if service.ref_counter().has(&key).await? {
            kept += 1;
            continue;
        }
        if service.cache_set().has(&key).await? {
            kept += 1;
            continue;
        }

        match service.delete_block(&key).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::warn!(key = %key, "failed to delete unreferenced block: {}", e);
            }
        }
    }

    tracing::info!("Deleted {} blocks, kept {}", deleted, kept);

    Ok(deleted)
}
