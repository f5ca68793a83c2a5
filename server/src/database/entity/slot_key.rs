//! The slot→key index.

use sea_orm::entity::prelude::*;

pub type SlotKeyModel = Model;

/// A block known to live in a slot.
///
/// Maintained on every successful put and delete so that migration and
/// garbage collection can enumerate a slot without scanning DataNodes.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "slot_key")]
pub struct Model {
    /// Unique numeric ID of the entry.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The slot the key routes to.
    #[sea_orm(indexed)]
    pub slot: i32,

    /// The CID of the block.
    #[sea_orm(unique)]
    pub key: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
