use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_companies_table::Migration),
            Box::new(m20240301_000002_create_users_table::Migration),
            Box::new(m20240301_000003_create_auth_token_tables::Migration),
            Box::new(m20240301_000004_create_suppliers_table::Migration),
            Box::new(m20240301_000005_create_warehouses_table::Migration),
            Box::new(m20240301_000006_create_products_tables::Migration),
            Box::new(m20240301_000007_create_inventory_items_table::Migration),
            Box::new(m20240301_000008_create_stock_movements_table::Migration),
            Box::new(m20240301_000009_create_orders_tables::Migration),
            Box::new(m20240301_000010_create_order_allocations_table::Migration),
        ]
    }
}

/// Identifiers shared by several migrations.
#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
    Name,
    Slug,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    CompanyId,
    Name,
    Email,
    PasswordHash,
    Role,
    PinHash,
    PinSetAt,
    Active,
    LastLoginAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Suppliers {
    Table,
    Id,
    CompanyId,
    Name,
    ContactName,
    Email,
    Phone,
    Address,
    Notes,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Warehouses {
    Table,
    Id,
    CompanyId,
    Name,
    Code,
    Address,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    CompanyId,
    Sku,
    Name,
    Description,
    Category,
    Price,
    CostPrice,
    Currency,
    ReorderPoint,
    Active,
    CreatedAt,
    UpdatedAt,
}

mod m20240301_000001_create_companies_table {
    use super::Companies;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_companies_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Companies::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Companies::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Companies::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Companies::Slug)
                                .string_len(100)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Companies::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Companies::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Companies::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000002_create_users_table {
    use super::{Companies, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(Users::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Users::Email)
                                .string_len(320)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::PasswordHash).text().null())
                        .col(ColumnDef::new(Users::Role).string_len(32).not_null())
                        .col(ColumnDef::new(Users::PinHash).text().null())
                        .col(ColumnDef::new(Users::PinSetAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Users::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::LastLoginAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_company_id")
                                .from(Users::Table, Users::CompanyId)
                                .to(Companies::Table, Companies::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_company_id")
                        .table(Users::Table)
                        .col(Users::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000003_create_auth_token_tables {
    use super::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_auth_token_tables"
        }
    }

    fn user_fk(name: &str, table: impl IntoIden + 'static, column: impl IntoIden + 'static) -> ForeignKeyCreateStatement {
        ForeignKey::create()
            .name(name)
            .from(table, column)
            .to(Users::Table, Users::Id)
            .on_delete(ForeignKeyAction::Cascade)
            .on_update(ForeignKeyAction::Cascade)
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RefreshTokens::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(RefreshTokens::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(RefreshTokens::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(RefreshTokens::TokenId)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::Revoked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RefreshTokens::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(&mut user_fk(
                            "fk_refresh_tokens_user_id",
                            RefreshTokens::Table,
                            RefreshTokens::UserId,
                        ))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OtpCodes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OtpCodes::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OtpCodes::UserId).uuid().not_null())
                        .col(ColumnDef::new(OtpCodes::CodeHash).string_len(64).not_null())
                        .col(
                            ColumnDef::new(OtpCodes::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::ConsumedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(&mut user_fk(
                            "fk_otp_codes_user_id",
                            OtpCodes::Table,
                            OtpCodes::UserId,
                        ))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_otp_codes_user_id")
                        .table(OtpCodes::Table)
                        .col(OtpCodes::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MagicLinks::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(MagicLinks::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(MagicLinks::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(MagicLinks::TokenHash)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(MagicLinks::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MagicLinks::ConsumedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MagicLinks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(&mut user_fk(
                            "fk_magic_links_user_id",
                            MagicLinks::Table,
                            MagicLinks::UserId,
                        ))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PasswordResetTokens::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PasswordResetTokens::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PasswordResetTokens::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PasswordResetTokens::TokenHash)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PasswordResetTokens::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PasswordResetTokens::UsedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PasswordResetTokens::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(&mut user_fk(
                            "fk_password_reset_tokens_user_id",
                            PasswordResetTokens::Table,
                            PasswordResetTokens::UserId,
                        ))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OauthAccounts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OauthAccounts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OauthAccounts::UserId).uuid().not_null())
                        .col(ColumnDef::new(OauthAccounts::Provider).string_len(32).not_null())
                        .col(
                            ColumnDef::new(OauthAccounts::ProviderUserId)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OauthAccounts::Email).string_len(320).null())
                        .col(
                            ColumnDef::new(OauthAccounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(&mut user_fk(
                            "fk_oauth_accounts_user_id",
                            OauthAccounts::Table,
                            OauthAccounts::UserId,
                        ))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_oauth_accounts_provider_identity")
                        .table(OauthAccounts::Table)
                        .col(OauthAccounts::Provider)
                        .col(OauthAccounts::ProviderUserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OauthAccounts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PasswordResetTokens::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(MagicLinks::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OtpCodes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RefreshTokens::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RefreshTokens {
        Table,
        Id,
        UserId,
        TokenId,
        ExpiresAt,
        Revoked,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum OtpCodes {
        Table,
        Id,
        UserId,
        CodeHash,
        ExpiresAt,
        Attempts,
        ConsumedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum MagicLinks {
        Table,
        Id,
        UserId,
        TokenHash,
        ExpiresAt,
        ConsumedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PasswordResetTokens {
        Table,
        Id,
        UserId,
        TokenHash,
        ExpiresAt,
        UsedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum OauthAccounts {
        Table,
        Id,
        UserId,
        Provider,
        ProviderUserId,
        Email,
        CreatedAt,
    }
}

mod m20240301_000004_create_suppliers_table {
    use super::{Companies, Suppliers};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_suppliers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Suppliers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Suppliers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Suppliers::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(Suppliers::Name).string_len(255).not_null())
                        .col(ColumnDef::new(Suppliers::ContactName).string_len(255).null())
                        .col(ColumnDef::new(Suppliers::Email).string_len(320).null())
                        .col(ColumnDef::new(Suppliers::Phone).string_len(50).null())
                        .col(ColumnDef::new(Suppliers::Address).text().null())
                        .col(ColumnDef::new(Suppliers::Notes).text().null())
                        .col(
                            ColumnDef::new(Suppliers::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Suppliers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Suppliers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_suppliers_company_id")
                                .from(Suppliers::Table, Suppliers::CompanyId)
                                .to(Companies::Table, Companies::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_suppliers_company_id")
                        .table(Suppliers::Table)
                        .col(Suppliers::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Suppliers::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000005_create_warehouses_table {
    use super::{Companies, Warehouses};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_warehouses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Warehouses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Warehouses::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(Warehouses::Name).string_len(255).not_null())
                        .col(ColumnDef::new(Warehouses::Code).string_len(50).not_null())
                        .col(ColumnDef::new(Warehouses::Address).text().null())
                        .col(
                            ColumnDef::new(Warehouses::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_warehouses_company_id")
                                .from(Warehouses::Table, Warehouses::CompanyId)
                                .to(Companies::Table, Companies::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_warehouses_company_code")
                        .table(Warehouses::Table)
                        .col(Warehouses::CompanyId)
                        .col(Warehouses::Code)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000006_create_products_tables {
    use super::{Companies, Products, Suppliers};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_products_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(Products::Sku).string_len(100).not_null())
                        .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(ColumnDef::new(Products::Category).string_len(100).null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal()
                                .not_null()
                                .check(Expr::col(Products::Price).gte(0)),
                        )
                        .col(ColumnDef::new(Products::CostPrice).decimal().null())
                        .col(ColumnDef::new(Products::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Products::ReorderPoint)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_company_id")
                                .from(Products::Table, Products::CompanyId)
                                .to(Companies::Table, Companies::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_products_company_sku")
                        .table(Products::Table)
                        .col(Products::CompanyId)
                        .col(Products::Sku)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_category")
                        .table(Products::Table)
                        .col(Products::CompanyId)
                        .col(Products::Category)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductSuppliers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ProductSuppliers::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductSuppliers::SupplierId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductSuppliers::SupplierSku)
                                .string_len(100)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductSuppliers::UnitCost)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductSuppliers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(ProductSuppliers::ProductId)
                                .col(ProductSuppliers::SupplierId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_suppliers_product_id")
                                .from(ProductSuppliers::Table, ProductSuppliers::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_suppliers_supplier_id")
                                .from(ProductSuppliers::Table, ProductSuppliers::SupplierId)
                                .to(Suppliers::Table, Suppliers::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductSuppliers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductSuppliers {
        Table,
        ProductId,
        SupplierId,
        SupplierSku,
        UnitCost,
        CreatedAt,
    }
}

mod m20240301_000007_create_inventory_items_table {
    use super::{Products, Warehouses};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::LotNumber).string_len(100).null())
                        .col(ColumnDef::new(InventoryItems::ExpiryDate).date().null())
                        .col(
                            ColumnDef::new(InventoryItems::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(InventoryItems::Quantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::ReservedQuantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(InventoryItems::ReservedQuantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_product_id")
                                .from(InventoryItems::Table, InventoryItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_warehouse_id")
                                .from(InventoryItems::Table, InventoryItems::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Rows without a lot are kept unique by the inventory service; NULLs are
            // distinct in a unique index.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_inventory_items_product_warehouse_lot")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::ProductId)
                        .col(InventoryItems::WarehouseId)
                        .col(InventoryItems::LotNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_company_warehouse")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::CompanyId)
                        .col(InventoryItems::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_expiry_date")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::ExpiryDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        CompanyId,
        ProductId,
        WarehouseId,
        LotNumber,
        ExpiryDate,
        Quantity,
        ReservedQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000008_create_stock_movements_table {
    use super::{Products, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000008_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::FromWarehouseId).uuid().null())
                        .col(ColumnDef::new(StockMovements::ToWarehouseId).uuid().null())
                        .col(ColumnDef::new(StockMovements::LotNumber).string_len(100).null())
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockMovements::Quantity).gte(0)),
                        )
                        .col(ColumnDef::new(StockMovements::QuantityBefore).integer().not_null())
                        .col(ColumnDef::new(StockMovements::QuantityAfter).integer().not_null())
                        .col(
                            ColumnDef::new(StockMovements::DestinationQuantityBefore)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::DestinationQuantityAfter)
                                .integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockMovements::Reference).string_len(255).null())
                        .col(ColumnDef::new(StockMovements::Reason).text().null())
                        .col(ColumnDef::new(StockMovements::ProcessedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_product_id")
                                .from(StockMovements::Table, StockMovements::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_processed_by")
                                .from(StockMovements::Table, StockMovements::ProcessedBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_company_created")
                        .table(StockMovements::Table)
                        .col(StockMovements::CompanyId)
                        .col(StockMovements::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_product_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        CompanyId,
        ProductId,
        MovementType,
        FromWarehouseId,
        ToWarehouseId,
        LotNumber,
        Quantity,
        QuantityBefore,
        QuantityAfter,
        DestinationQuantityBefore,
        DestinationQuantityAfter,
        Reference,
        Reason,
        ProcessedBy,
        CreatedAt,
    }
}

mod m20240301_000009_create_orders_tables {
    use super::{Products, Users, Warehouses};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000009_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::CompanyId).uuid().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string_len(50).not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string_len(255).not_null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string_len(320).null())
                        .col(ColumnDef::new(Orders::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(ColumnDef::new(Orders::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::FulfilledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_warehouse_id")
                                .from(Orders::Table, Orders::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_created_by")
                                .from(Orders::Table, Orders::CreatedBy)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_orders_company_order_number")
                        .table(Orders::Table)
                        .col(Orders::CompanyId)
                        .col(Orders::OrderNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_company_status")
                        .table(Orders::Table)
                        .col(Orders::CompanyId)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(OrderItems::Quantity).gt(0)),
                        )
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                        .col(ColumnDef::new(OrderItems::LineTotal).decimal().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_product_id")
                                .from(OrderItems::Table, OrderItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        CompanyId,
        OrderNumber,
        CustomerName,
        CustomerEmail,
        WarehouseId,
        Status,
        TotalAmount,
        Currency,
        Notes,
        CreatedBy,
        ConfirmedAt,
        FulfilledAt,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        UnitPrice,
        LineTotal,
    }
}

mod m20240301_000010_create_order_allocations_table {
    use super::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000010_create_order_allocations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderAllocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderAllocations::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderAllocations::InventoryItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderAllocations::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderAllocations::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(OrderAllocations::Quantity).gt(0)),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_allocations_order_id")
                                .from(OrderAllocations::Table, OrderAllocations::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_allocations_inventory_item_id")
                                .from(OrderAllocations::Table, OrderAllocations::InventoryItemId)
                                .to(InventoryItems::Table, InventoryItems::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_allocations_product_id")
                                .from(OrderAllocations::Table, OrderAllocations::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_allocations_order_id")
                        .table(OrderAllocations::Table)
                        .col(OrderAllocations::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_allocations_inventory_item_id")
                        .table(OrderAllocations::Table)
                        .col(OrderAllocations::InventoryItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderAllocations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderAllocations {
        Table,
        Id,
        OrderId,
        InventoryItemId,
        ProductId,
        Quantity,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    #[tokio::test]
    async fn applies_and_rolls_back_on_sqlite() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let manager = SchemaManager::new(&db);
        for table in ["products", "inventory_items", "orders", "order_items", "order_allocations"] {
            assert!(manager.has_table(table).await.unwrap(), "{}", table);
        }
        Migrator::down(&db, None).await.unwrap();
        assert!(!manager.has_table("products").await.unwrap());
    }
}
