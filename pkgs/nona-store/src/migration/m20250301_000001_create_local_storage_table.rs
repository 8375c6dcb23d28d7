use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum LocalStorage {
    Table,
    Key,
    Value,
    UpdatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_local_storage_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LocalStorage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LocalStorage::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LocalStorage::Value).text().not_null())
                    .col(ColumnDef::new(LocalStorage::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LocalStorage::Table).to_owned())
            .await
    }
}
