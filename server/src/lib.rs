//! The DagPool Server.
//!
//! The cluster layer of the pool: slot-mapped routing over DagNodes,
//! erasure-striped block placement, reference counting, slot
//! migration, and garbage collection, persisted in an embedded
//! database.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod access;
pub mod api;
pub mod config;
pub mod database;
mod error;
pub mod gc;
pub mod migrate;
pub mod node;
pub mod pool;
mod reference;
mod slots;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::join;
use tokio_util::sync::CancellationToken;

pub use error::{ServerError, ServerResult};
pub use pool::{ClusterState, DagPoolService, StatusReport};

/// Runs the service with its background tasks until `token` is
/// canceled.
///
/// The migration worker resumes any journaled migrations immediately;
/// the collector ticks on its configured period. Both stop at their
/// next suspension point on cancellation.
pub async fn run_background_tasks(service: Arc<DagPoolService>, token: CancellationToken) {
    let (_, _) = join!(
        migrate::run_migration_worker(service.clone(), token.clone()),
        gc::run_garbage_collection(service.clone(), token.clone()),
    );
}
