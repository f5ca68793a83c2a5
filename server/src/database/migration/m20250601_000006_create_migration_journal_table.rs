use sea_orm_migration::prelude::*;

use crate::database::entity::migration_journal::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250601_000006_create_migration_journal_table"
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
                    .col(ColumnDef::new(Column::FromNode).string().not_null())
                    .col(ColumnDef::new(Column::ToNode).string().not_null())
                    .col(
                        ColumnDef::new(Column::State)
                            .r#char()
                            .char_len(1)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }
}
