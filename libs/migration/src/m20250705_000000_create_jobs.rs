use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create job_status enum
        manager
            .create_type(
                Type::create()
                    .as_enum(JobStatus::Enum)
                    .values([
                        JobStatus::Pending,
                        JobStatus::Assigned,
                        JobStatus::Processing,
                        JobStatus::Complete,
                        JobStatus::Failed,
                        JobStatus::Expired,
                    ])
                    .to_owned(),
            )
            .await?;

        // Create jobs table
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(pk_uuid(Jobs::Id))
                    .col(
                        ColumnDef::new(Jobs::Status)
                            .enumeration(
                                JobStatus::Enum,
                                [
                                    JobStatus::Pending,
                                    JobStatus::Assigned,
                                    JobStatus::Processing,
                                    JobStatus::Complete,
                                    JobStatus::Failed,
                                    JobStatus::Expired,
                                ],
                            )
                            .not_null()
                            .default("pending"),
                    )
                    .col(string(Jobs::OriginalFilename))
                    .col(string(Jobs::InputPath))
                    .col(string(Jobs::InputHash))
                    .col(string(Jobs::Submitter))
                    .col(string_null(Jobs::UserAgent))
                    .col(json_binary(Jobs::Settings))
                    .col(string_null(Jobs::CurrentStep))
                    .col(integer(Jobs::ProgressPct).default(0))
                    .col(string_null(Jobs::ProgressMessage))
                    .col(string_null(Jobs::StlPath))
                    .col(string_null(Jobs::GlbPath))
                    .col(big_integer_null(Jobs::VertexCount))
                    .col(big_integer_null(Jobs::FaceCount))
                    .col(boolean_null(Jobs::IsWatertight))
                    .col(double_null(Jobs::GenerationTimeS))
                    .col(json_binary_null(Jobs::GpuMetrics))
                    .col(text_null(Jobs::ErrorMessage))
                    .col(string_null(Jobs::ErrorStep))
                    .col(
                        timestamp_with_time_zone(Jobs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Jobs::AssignedAt))
                    .col(timestamp_with_time_zone_null(Jobs::CompletedAt))
                    .to_owned(),
            )
            .await?;

        // Claim path scans pending rows in FIFO order
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_created_at")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Quota counting by submitter over a time window
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_submitter_created_at")
                    .table(Jobs::Table)
                    .col(Jobs::Submitter)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(JobStatus::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    Status,
    OriginalFilename,
    InputPath,
    InputHash,
    Submitter,
    UserAgent,
    Settings,
    CurrentStep,
    ProgressPct,
    ProgressMessage,
    StlPath,
    GlbPath,
    VertexCount,
    FaceCount,
    IsWatertight,
    GenerationTimeS,
    GpuMetrics,
    ErrorMessage,
    ErrorStep,
    CreatedAt,
    AssignedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum JobStatus {
    #[sea_orm(iden = "job_status")]
    Enum,
    Pending,
    Assigned,
    Processing,
    Complete,
    Failed,
    Expired,
}
