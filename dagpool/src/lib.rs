//! The DagPool Library.
//!
//! Common components shared by the cluster layer and the DataNode
//! storage layer: content addressing, the slot keyspace, the erasure
//! codec, and the public error taxonomy.

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

pub mod block;
pub mod erasure;
pub mod error;
pub mod hash;
pub mod slot;
pub mod testing;

pub use error::{DagPoolError, DagPoolResult, ErrorKind};
