//! A cache set membership.

use sea_orm::entity::prelude::*;

pub type CacheEntryModel = Model;

/// A block that was stored unpinned.
///
/// Membership-only: the row's existence is the fact. A key is never in
/// this table while it has a positive reference count.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cache_entry")]
pub struct Model {
    /// The CID of the block.
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Timestamp when the entry was created.
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
