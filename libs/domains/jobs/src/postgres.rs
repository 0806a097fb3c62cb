use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::ActiveValue::{Set, Unchanged};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::entity;
use crate::error::{JobError, JobResult};
use crate::models::{Job, JobStatus, NewJob};
use crate::repository::{JobPatch, JobRepository};

/// PostgreSQL-backed job repository.
pub struct PgJobRepository {
    db: DatabaseConnection,
}

impl PgJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    fn apply_patch(active: &mut entity::ActiveModel, patch: JobPatch) {
        if let Some(status) = patch.status {
            active.status = Set(status);
        }
        if let Some(step) = patch.current_step {
            active.current_step = Set(step);
        }
        if let Some(pct) = patch.progress_pct {
            active.progress_pct = Set(pct);
        }
        if let Some(message) = patch.progress_message {
            active.progress_message = Set(message);
        }
        if let Some(stl_path) = patch.stl_path {
            active.stl_path = Set(stl_path);
        }
        if let Some(glb_path) = patch.glb_path {
            active.glb_path = Set(glb_path);
        }
        if let Some(vertex_count) = patch.vertex_count {
            active.vertex_count = Set(vertex_count);
        }
        if let Some(face_count) = patch.face_count {
            active.face_count = Set(face_count);
        }
        if let Some(is_watertight) = patch.is_watertight {
            active.is_watertight = Set(is_watertight);
        }
        if let Some(generation_time_s) = patch.generation_time_s {
            active.generation_time_s = Set(generation_time_s);
        }
        if let Some(gpu_metrics) = patch.gpu_metrics {
            active.gpu_metrics = Set(gpu_metrics);
        }
        if let Some(error_message) = patch.error_message {
            active.error_message = Set(error_message);
        }
        if let Some(error_step) = patch.error_step {
            active.error_step = Set(error_step);
        }
        if let Some(assigned_at) = patch.assigned_at {
            active.assigned_at = Set(assigned_at.map(Into::into));
        }
        if let Some(completed_at) = patch.completed_at {
            active.completed_at = Set(completed_at.map(Into::into));
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, input: NewJob) -> JobResult<Job> {
        let active: entity::ActiveModel = input.into();
        let model = entity::Entity::insert(active)
            .exec_with_returning(&self.db)
            .await?;

        tracing::info!(job_id = %model.id, "Created job");
        Ok(model.into())
    }

    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>> {
        let model = entity::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn claim_next_pending(&self) -> JobResult<Option<Job>> {
        let txn = self.db.begin().await?;

        // Single-in-flight invariant: never claim while a job is out with
        // the worker.
        let in_flight = entity::Entity::find()
            .filter(
                entity::Column::Status.is_in([JobStatus::Assigned, JobStatus::Processing]),
            )
            .count(&txn)
            .await?;
        if in_flight > 0 {
            txn.commit().await?;
            return Ok(None);
        }

        let found = entity::Entity::find()
            .filter(entity::Column::Status.eq(JobStatus::Pending))
            .order_by_asc(entity::Column::CreatedAt)
            .order_by_asc(entity::Column::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?;

        let Some(model) = found else {
            txn.commit().await?;
            return Ok(None);
        };

        let mut active: entity::ActiveModel = model.into();
        active.status = Set(JobStatus::Assigned);
        active.assigned_at = Set(Some(Utc::now().into()));
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        Ok(Some(updated.into()))
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> JobResult<Job> {
        let mut active = entity::ActiveModel {
            id: Unchanged(id),
            ..Default::default()
        };
        Self::apply_patch(&mut active, patch);

        match active.update(&self.db).await {
            Ok(model) => Ok(model.into()),
            Err(DbErr::RecordNotFound(_)) | Err(DbErr::RecordNotUpdated) => {
                Err(JobError::NotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> JobResult<Vec<Uuid>> {
        let txn = self.db.begin().await?;

        let stale: Vec<Uuid> = entity::Entity::find()
            .select_only()
            .column(entity::Column::Id)
            .filter(
                entity::Column::Status.is_in([JobStatus::Assigned, JobStatus::Processing]),
            )
            .filter(entity::Column::AssignedAt.lt(cutoff))
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .into_tuple()
            .all(&txn)
            .await?;

        if stale.is_empty() {
            txn.commit().await?;
            return Ok(stale);
        }

        entity::Entity::update_many()
            .col_expr(entity::Column::Status, JobStatus::Expired.as_enum())
            .col_expr(
                entity::Column::ErrorMessage,
                Expr::value("Job timed out"),
            )
            .col_expr(
                entity::Column::CompletedAt,
                Expr::value(Utc::now()),
            )
            .filter(entity::Column::Id.is_in(stale.clone()))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(stale)
    }

    async fn reset_orphaned(&self) -> JobResult<u64> {
        let result = entity::Entity::update_many()
            .col_expr(entity::Column::Status, JobStatus::Pending.as_enum())
            .col_expr(entity::Column::AssignedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(entity::Column::CurrentStep, Expr::value(Option::<String>::None))
            .col_expr(entity::Column::ProgressPct, Expr::value(0))
            .col_expr(
                entity::Column::ProgressMessage,
                Expr::value(Option::<String>::None),
            )
            .filter(
                entity::Column::Status.is_in([JobStatus::Assigned, JobStatus::Processing]),
            )
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64> {
        let count = entity::Entity::find()
            .filter(entity::Column::Status.eq(status))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn status_counts(&self) -> JobResult<Vec<(JobStatus, u64)>> {
        let rows: Vec<(JobStatus, i64)> = entity::Entity::find()
            .select_only()
            .column(entity::Column::Status)
            .column_as(entity::Column::Id.count(), "count")
            .group_by(entity::Column::Status)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count as u64))
            .collect())
    }

    async fn pending_before(&self, created_at: DateTime<Utc>, id: Uuid) -> JobResult<u64> {
        // FIFO order with the same tie-break the claim uses
        let count = entity::Entity::find()
            .filter(entity::Column::Status.eq(JobStatus::Pending))
            .filter(
                Condition::any()
                    .add(entity::Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(entity::Column::CreatedAt.eq(created_at))
                            .add(entity::Column::Id.lt(id)),
                    ),
            )
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn completed_stats(&self) -> JobResult<(u64, Option<f64>)> {
        let row: Option<(i64, Option<f64>)> = entity::Entity::find()
            .select_only()
            .column_as(entity::Column::Id.count(), "total")
            .column_as(entity::Column::GenerationTimeS.sum(), "total_time")
            .filter(entity::Column::Status.eq(JobStatus::Complete))
            .into_tuple()
            .one(&self.db)
            .await?;

        match row {
            Some((total, time)) if total > 0 => {
                Ok((total as u64, time.map(|sum| sum / total as f64)))
            }
            _ => Ok((0, None)),
        }
    }
}
