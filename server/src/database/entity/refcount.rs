//! A pin reference count.

use sea_orm::entity::prelude::*;

pub type RefCountModel = Model;

/// The pin count of one block.
///
/// Rows only exist while the count is positive; dropping to zero
/// deletes the row and makes the key eligible for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "refcount")]
pub struct Model {
    /// The CID of the block.
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Number of outstanding pins. Always positive.
    pub count: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
