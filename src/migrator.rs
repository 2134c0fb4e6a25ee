use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_directory_tables::Migration),
            Box::new(m20240101_000002_create_receipt_tables::Migration),
            Box::new(m20240101_000003_create_shipment_tables::Migration),
            Box::new(m20240101_000004_create_balances_table::Migration),
        ]
    }
}

/// SQLite caps decimal precision at 16 digits.
pub(crate) const QUANTITY_PRECISION: u32 = 16;
pub(crate) const QUANTITY_SCALE: u32 = 4;

#[derive(DeriveIden, Clone, Copy)]
enum Clients {
    Table,
    Id,
    Name,
    Address,
    IsArchived,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum Resources {
    Table,
    Id,
    Name,
    IsArchived,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum Units {
    Table,
    Id,
    Name,
    IsArchived,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum ReceiptDocuments {
    Table,
    Id,
    Number,
    Date,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum ReceiptItems {
    Table,
}

#[derive(DeriveIden, Clone, Copy)]
enum ShipmentDocuments {
    Table,
    Id,
    Number,
    ClientId,
    Date,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum ShipmentItems {
    Table,
}

#[derive(DeriveIden, Clone, Copy)]
enum Balances {
    Table,
    Id,
    ResourceId,
    UnitId,
    Quantity,
    CreatedAt,
    UpdatedAt,
}

/// Columns shared by receipt and shipment item tables
#[derive(DeriveIden, Clone, Copy)]
enum DocumentItem {
    Id,
    DocumentId,
    ResourceId,
    UnitId,
    Quantity,
    CreatedAt,
    UpdatedAt,
}

fn id_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn timestamps<T: IntoIden>(table: &mut TableCreateStatement, created: T, updated: T) {
    table
        .col(
            ColumnDef::new(created)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(ColumnDef::new(updated).timestamp_with_time_zone().null());
}

/// Named directory table: id, unique name, archived flag, timestamps.
fn directory_table<T>(table: T, id: T, name: T, archived: T) -> TableCreateStatement
where
    T: IntoIden + Copy + 'static,
{
    Table::create()
        .table(table)
        .if_not_exists()
        .col(&mut id_col(id))
        .col(ColumnDef::new(name).string_len(255).not_null().unique_key())
        .col(
            ColumnDef::new(archived)
                .boolean()
                .not_null()
                .default(false),
        )
        .to_owned()
}

fn item_table<D, P>(table: D, document_table: P, document_id: P, fk_prefix: &str) -> TableCreateStatement
where
    D: IntoIden + Copy + 'static,
    P: IntoIden + Copy + 'static,
{
    let mut stmt = Table::create()
        .table(table)
        .if_not_exists()
        .col(&mut id_col(DocumentItem::Id))
        .col(ColumnDef::new(DocumentItem::DocumentId).integer().not_null())
        .col(ColumnDef::new(DocumentItem::ResourceId).integer().not_null())
        .col(ColumnDef::new(DocumentItem::UnitId).integer().not_null())
        .col(
            ColumnDef::new(DocumentItem::Quantity)
                .decimal_len(QUANTITY_PRECISION, QUANTITY_SCALE)
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{}_document_id", fk_prefix))
                .from(table, DocumentItem::DocumentId)
                .to(document_table, document_id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{}_resource_id", fk_prefix))
                .from(table, DocumentItem::ResourceId)
                .to(Resources::Table, Resources::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{}_unit_id", fk_prefix))
                .from(table, DocumentItem::UnitId)
                .to(Units::Table, Units::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_owned();
    timestamps(&mut stmt, DocumentItem::CreatedAt, DocumentItem::UpdatedAt);
    stmt
}

mod m20240101_000001_create_directory_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_directory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut clients = directory_table(
                Clients::Table,
                Clients::Id,
                Clients::Name,
                Clients::IsArchived,
            );
            clients.col(
                ColumnDef::new(Clients::Address)
                    .string_len(512)
                    .not_null()
                    .default(""),
            );
            timestamps(&mut clients, Clients::CreatedAt, Clients::UpdatedAt);
            manager.create_table(clients).await?;

            let mut resources = directory_table(
                Resources::Table,
                Resources::Id,
                Resources::Name,
                Resources::IsArchived,
            );
            timestamps(&mut resources, Resources::CreatedAt, Resources::UpdatedAt);
            manager.create_table(resources).await?;

            let mut units = directory_table(Units::Table, Units::Id, Units::Name, Units::IsArchived);
            timestamps(&mut units, Units::CreatedAt, Units::UpdatedAt);
            manager.create_table(units).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Units::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Resources::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Clients::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_receipt_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_receipt_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut documents = Table::create()
                .table(ReceiptDocuments::Table)
                .if_not_exists()
                .col(&mut id_col(ReceiptDocuments::Id))
                .col(
                    ColumnDef::new(ReceiptDocuments::Number)
                        .string_len(64)
                        .not_null()
                        .unique_key(),
                )
                .col(ColumnDef::new(ReceiptDocuments::Date).date().not_null())
                .to_owned();
            timestamps(
                &mut documents,
                ReceiptDocuments::CreatedAt,
                ReceiptDocuments::UpdatedAt,
            );
            manager.create_table(documents).await?;

            manager
                .create_table(item_table(
                    ReceiptItems::Table,
                    ReceiptDocuments::Table,
                    ReceiptDocuments::Id,
                    "receipt_items",
                ))
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_receipt_items_document_id")
                        .table(ReceiptItems::Table)
                        .col(DocumentItem::DocumentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_receipt_items_resource_unit")
                        .table(ReceiptItems::Table)
                        .col(DocumentItem::ResourceId)
                        .col(DocumentItem::UnitId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReceiptItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ReceiptDocuments::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000003_create_shipment_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_shipment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut documents = Table::create()
                .table(ShipmentDocuments::Table)
                .if_not_exists()
                .col(&mut id_col(ShipmentDocuments::Id))
                .col(
                    ColumnDef::new(ShipmentDocuments::Number)
                        .string_len(64)
                        .not_null()
                        .unique_key(),
                )
                .col(
                    ColumnDef::new(ShipmentDocuments::ClientId)
                        .integer()
                        .not_null(),
                )
                .col(ColumnDef::new(ShipmentDocuments::Date).date().not_null())
                .col(
                    ColumnDef::new(ShipmentDocuments::Status)
                        .string_len(16)
                        .not_null()
                        .default("draft"),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_shipment_documents_client_id")
                        .from(ShipmentDocuments::Table, ShipmentDocuments::ClientId)
                        .to(Clients::Table, Clients::Id)
                        .on_delete(ForeignKeyAction::Restrict),
                )
                .to_owned();
            timestamps(
                &mut documents,
                ShipmentDocuments::CreatedAt,
                ShipmentDocuments::UpdatedAt,
            );
            manager.create_table(documents).await?;

            manager
                .create_table(item_table(
                    ShipmentItems::Table,
                    ShipmentDocuments::Table,
                    ShipmentDocuments::Id,
                    "shipment_items",
                ))
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipment_items_document_id")
                        .table(ShipmentItems::Table)
                        .col(DocumentItem::DocumentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipment_documents_status")
                        .table(ShipmentDocuments::Table)
                        .col(ShipmentDocuments::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShipmentItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ShipmentDocuments::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000004_create_balances_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_balances_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let mut balances = Table::create()
                .table(Balances::Table)
                .if_not_exists()
                .col(&mut id_col(Balances::Id))
                .col(ColumnDef::new(Balances::ResourceId).integer().not_null())
                .col(ColumnDef::new(Balances::UnitId).integer().not_null())
                .col(
                    ColumnDef::new(Balances::Quantity)
                        .decimal_len(QUANTITY_PRECISION, QUANTITY_SCALE)
                        .not_null(),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_balances_resource_id")
                        .from(Balances::Table, Balances::ResourceId)
                        .to(Resources::Table, Resources::Id)
                        .on_delete(ForeignKeyAction::Restrict),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_balances_unit_id")
                        .from(Balances::Table, Balances::UnitId)
                        .to(Units::Table, Units::Id)
                        .on_delete(ForeignKeyAction::Restrict),
                )
                .to_owned();
            timestamps(&mut balances, Balances::CreatedAt, Balances::UpdatedAt);
            manager.create_table(balances).await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_balances_resource_unit")
                        .table(Balances::Table)
                        .col(Balances::ResourceId)
                        .col(Balances::UnitId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Balances::Table).to_owned())
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbConfig};
    use std::collections::HashSet;

    #[test]
    fn migration_names_are_distinct() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "duplicate names in {:?}", names);
        assert_eq!(names[0], "m20240101_000001_create_directory_tables");
    }

    #[test]
    fn quantity_columns_build_for_every_backend() {
        let table = item_table(
            ReceiptItems::Table,
            ReceiptDocuments::Table,
            ReceiptDocuments::Id,
            "receipt_items",
        );
        assert!(table.to_string(SqliteQueryBuilder).contains("real(16, 4)"));
        assert!(table.to_string(PostgresQueryBuilder).contains("decimal(16, 4)"));
    }

    #[tokio::test]
    async fn all_migrations_apply_and_rerun_cleanly() {
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();

        db::run_migrations(&pool).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let applied = Migrator::get_applied_migrations(&pool).await.unwrap();
        assert_eq!(applied.len(), Migrator::migrations().len());
        let manager = SchemaManager::new(&pool);
        for table in ["clients", "receipt_items", "shipment_items", "balances"] {
            assert!(manager.has_table(table).await.unwrap(), "{} missing", table);
        }
    }
}
