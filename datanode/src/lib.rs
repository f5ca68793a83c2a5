//! The DataNode storage layer.
//!
//! A DataNode persists the shards of one DagNode slice in a set of
//! append-only casks (a vlog/hint file pair per cask, Bitcask-style).
//! The async [`DataNodeClient`] trait is the service surface the
//! cluster layer consumes; [`LocalDataNode`] embeds a [`CaskStore`]
//! directly, and the mock backend in [`testing`] stands in for remote
//! members in tests.

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

mod cask;
pub mod error;
mod repo;
mod service;
mod store;
pub mod testing;

pub use error::{DataNodeError, DataNodeResult};
pub use service::{DataNodeClient, LocalDataNode};
pub use store::{CaskStore, StoreConfig, DEFAULT_CASK_NUM};
