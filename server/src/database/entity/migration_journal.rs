//! The slot migration journal.

use sea_orm::entity::prelude::*;

pub type MigrationJournalModel = Model;

/// The phase a migrating slot is in.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(1))")]
pub enum MigrateState {
    /// The journal entry exists but the slot table may not yet point
    /// at the new owner.
    #[sea_orm(string_value = "P")]
    Preparing,

    /// Blocks are being copied from the old owner to the new one.
    #[sea_orm(string_value = "C")]
    Copying,

    /// The copy finished; the table update clearing `importing_from`
    /// is being published.
    #[sea_orm(string_value = "S")]
    Switching,

    /// Copied blocks are being deleted from the old owner. The entry
    /// is dropped when the deletions finish.
    #[sea_orm(string_value = "D")]
    Done,
}

/// A journaled slot migration.
///
/// Append-only from the perspective of crash recovery: the journal is
/// replayed on startup and every phase is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "migration_journal")]
pub struct Model {
    /// The migrating slot.
    #[sea_orm(primary_key, auto_increment = false)]
    pub slot: i32,

    /// The DagNode losing the slot.
    pub from_node: String,

    /// The DagNode gaining the slot.
    pub to_node: String,

    /// The migration phase.
    pub state: MigrateState,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
