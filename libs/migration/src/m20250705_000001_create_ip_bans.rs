use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IpBans::Table)
                    .if_not_exists()
                    .col(pk_auto(IpBans::Id))
                    .col(string_uniq(IpBans::IpOrCidr))
                    .col(string_null(IpBans::Reason))
                    .col(
                        timestamp_with_time_zone(IpBans::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IpBans::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum IpBans {
    Table,
    Id,
    IpOrCidr,
    Reason,
    CreatedAt,
}
