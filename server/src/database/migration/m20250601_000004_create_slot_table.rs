use sea_orm_migration::prelude::*;

use crate::database::entity::slot::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000004_create_slot_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .col(
                        ColumnDef::new(Column::Slot)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Column::Owner).string().not_null())
                    .col(ColumnDef::new(Column::ImportingFrom).string().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-slot-owner")
                    .table(Entity)
                    .col(Column::Owner)
                    .to_owned(),
            )
            .await
    }
}
