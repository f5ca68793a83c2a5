//! A slot ownership record.

use sea_orm::entity::prelude::*;

pub type SlotModel = Model;

/// Ownership of one routing slot.
///
/// Exactly 16,384 rows exist once the cluster is initialized. A row
/// with `importing_from` set is mid-migration.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "slot")]
pub struct Model {
    /// The slot number, in `[0, 16384)`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub slot: i32,

    /// Name of the owning DagNode.
    #[sea_orm(indexed)]
    pub owner: String,

    /// The previous owner while the slot is migrating.
    pub importing_from: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
