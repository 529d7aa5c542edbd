use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookSubscription::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookSubscription::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookSubscription::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(WebhookSubscription::ChannelId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookSubscription::ResourceId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookSubscription::Token)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookSubscription::ResourceUri).string().null())
                    .col(
                        ColumnDef::new(WebhookSubscription::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookSubscription::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(WebhookSubscription::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookSubscription::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_webhook_subscriptions_user_id")
                            .from(WebhookSubscription::Table, WebhookSubscription::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_subscriptions_channel_id")
                    .table(WebhookSubscription::Table)
                    .col(WebhookSubscription::ChannelId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_subscriptions_resource_id")
                    .table(WebhookSubscription::Table)
                    .col(WebhookSubscription::ResourceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WebhookSubscription::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookSubscription {
    #[sea_orm(iden = "webhook_subscriptions")]
    Table,
    Id,
    UserId,
    ChannelId,
    ResourceId,
    Token,
    ResourceUri,
    ExpiresAt,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum User {
    #[sea_orm(iden = "users")]
    Table,
    Id,
}
