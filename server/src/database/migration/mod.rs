//! Database migrations.

pub use sea_orm_migration::*;

mod m20250601_000001_create_user_table;
mod m20250601_000002_create_refcount_table;
mod m20250601_000003_create_cache_entry_table;
mod m20250601_000004_create_slot_table;
mod m20250601_000005_create_slot_key_table;
mod m20250601_000006_create_migration_journal_table;
mod m20250601_000007_create_dag_node_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_user_table::Migration),
            Box::new(m20250601_000002_create_refcount_table::Migration),
            Box::new(m20250601_000003_create_cache_entry_table::Migration),
            Box::new(m20250601_000004_create_slot_table::Migration),
            Box::new(m20250601_000005_create_slot_key_table::Migration),
            Box::new(m20250601_000006_create_migration_journal_table::Migration),
            Box::new(m20250601_000007_create_dag_node_table::Migration),
        ]
    }
}
