use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{JobError, JobResult};
use crate::models::{Job, JobStatus, MeshOutput, NewJob, ProgressUpdate, QueueSummary};
use crate::repository::{JobPatch, JobRepository};

/// Transactional façade over the job store: owns every status transition.
///
/// The repository persists; this service decides. All transitions are
/// idempotent with respect to their target status: repeating a terminal
/// transition is a no-op, while conflicting terminal transitions are
/// rejected.
#[derive(Clone)]
pub struct QueueService<R: JobRepository> {
    repository: Arc<R>,
}

impl<R: JobRepository> QueueService<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    /// Persist a new job as `pending`.
    #[instrument(skip(self, input), fields(job_id = %input.id))]
    pub async fn enqueue(&self, input: NewJob) -> JobResult<Job> {
        let job = self.repository.insert(input).await?;
        info!(job_id = %job.id, submitter = %job.submitter, "Job enqueued");
        Ok(job)
    }

    /// Fetch a job row.
    pub async fn get_job(&self, id: Uuid) -> JobResult<Job> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(JobError::NotFound(id))
    }

    /// Claim the oldest pending job for dispatch, flipping it to `assigned`.
    ///
    /// Returns `None` when nothing is claimable (empty queue or a job is
    /// already in flight).
    pub async fn claim_next_pending(&self) -> JobResult<Option<Job>> {
        let claimed = self.repository.claim_next_pending().await?;
        if let Some(ref job) = claimed {
            info!(job_id = %job.id, "Claimed job for dispatch");
        }
        Ok(claimed)
    }

    /// Record a progress report from the worker.
    ///
    /// Flips `assigned → processing` on the first report. Progress percent
    /// is clamped forward: a regression is logged and ignored. Reports for
    /// unknown or already-terminal jobs are dropped.
    pub async fn record_progress(
        &self,
        id: Uuid,
        update: ProgressUpdate,
    ) -> JobResult<Option<Job>> {
        let Some(job) = self.repository.find_by_id(id).await? else {
            warn!(job_id = %id, "Progress for unknown job, dropping");
            return Ok(None);
        };

        if job.is_terminal() {
            debug!(job_id = %id, status = %job.status, "Progress after terminal state, dropping");
            return Ok(None);
        }

        let mut pct = update.pct.clamp(0, 100);
        if pct < job.progress_pct {
            warn!(
                job_id = %id,
                stored = job.progress_pct,
                received = pct,
                "Progress regression from worker, clamping forward"
            );
            pct = job.progress_pct;
        }

        let patch = JobPatch {
            status: (job.status == JobStatus::Assigned).then_some(JobStatus::Processing),
            current_step: Some(update.step),
            progress_pct: Some(pct),
            progress_message: Some(update.message),
            ..Default::default()
        };

        let updated = self.repository.update(id, patch).await?;
        Ok(Some(updated))
    }

    /// Transition a job to `complete` and persist its result.
    ///
    /// A repeat of the same transition is a no-op; completing a job that
    /// failed or expired is rejected.
    #[instrument(skip(self, output), fields(job_id = %id))]
    pub async fn mark_complete(&self, id: Uuid, output: MeshOutput) -> JobResult<Job> {
        let job = self.get_job(id).await?;

        if job.status == JobStatus::Complete {
            debug!(job_id = %id, "Job already complete, ignoring repeat");
            return Ok(job);
        }
        if job.is_terminal() {
            return Err(JobError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Complete,
            });
        }

        let patch = JobPatch {
            status: Some(JobStatus::Complete),
            current_step: Some(Some("complete".to_string())),
            progress_pct: Some(100),
            stl_path: Some(output.stl_path),
            glb_path: Some(output.glb_path),
            vertex_count: Some(Some(output.vertex_count)),
            face_count: Some(Some(output.face_count)),
            is_watertight: Some(Some(output.is_watertight)),
            generation_time_s: Some(Some(output.generation_time_s)),
            gpu_metrics: Some(output.gpu_metrics),
            completed_at: Some(Some(Utc::now())),
            ..Default::default()
        };

        let updated = self.repository.update(id, patch).await?;
        info!(
            job_id = %id,
            vertices = updated.vertex_count,
            "Job complete"
        );
        Ok(updated)
    }

    /// Transition a job to `failed` with the worker's error verbatim.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error: impl Into<String> + std::fmt::Debug,
        step: Option<String>,
    ) -> JobResult<Job> {
        let job = self.get_job(id).await?;
        let error = error.into();

        if job.status == JobStatus::Failed {
            debug!(job_id = %id, "Job already failed, ignoring repeat");
            return Ok(job);
        }
        if job.is_terminal() {
            return Err(JobError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Failed,
            });
        }

        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error_message: Some(Some(error.clone())),
            error_step: Some(step.clone()),
            completed_at: Some(Some(Utc::now())),
            ..Default::default()
        };

        let updated = self.repository.update(id, patch).await?;
        warn!(job_id = %id, step = ?step, error = %error, "Job failed");
        Ok(updated)
    }

    /// Expire in-flight jobs whose assignment is older than `timeout`.
    pub async fn expire_stale(&self, timeout: Duration) -> JobResult<Vec<Uuid>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| JobError::Internal(format!("invalid timeout: {}", e)))?;

        let expired = self.repository.expire_stale(cutoff).await?;
        if !expired.is_empty() {
            warn!(count = expired.len(), ids = ?expired, "Expired stale jobs");
        }
        Ok(expired)
    }

    /// Reset jobs orphaned by a previous coordinator process.
    ///
    /// Call on startup, before accepting connections: no worker session
    /// survives a restart, so anything assigned/processing must be
    /// re-dispatched from scratch.
    pub async fn recover_orphaned(&self) -> JobResult<u64> {
        let reset = self.repository.reset_orphaned().await?;
        if reset > 0 {
            info!(count = reset, "Re-queued orphaned jobs on startup");
        }
        Ok(reset)
    }

    /// Admin retry: put a terminal job back in the queue, clearing all
    /// derived state.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry(&self, id: Uuid) -> JobResult<Job> {
        let job = self.get_job(id).await?;

        if !job.is_terminal() {
            return Err(JobError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }

        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            current_step: Some(None),
            progress_pct: Some(0),
            progress_message: Some(None),
            stl_path: Some(None),
            glb_path: Some(None),
            vertex_count: Some(None),
            face_count: Some(None),
            is_watertight: Some(None),
            generation_time_s: Some(None),
            gpu_metrics: Some(None),
            error_message: Some(None),
            error_step: Some(None),
            assigned_at: Some(None),
            completed_at: Some(None),
        };

        let updated = self.repository.update(id, patch).await?;
        info!(job_id = %id, "Job reset to pending by admin retry");
        Ok(updated)
    }

    /// Jobs currently waiting, for admission control.
    pub async fn pending_count(&self) -> JobResult<u64> {
        self.repository.count_by_status(JobStatus::Pending).await
    }

    /// Counts by status, for dashboards.
    pub async fn summary(&self) -> JobResult<QueueSummary> {
        let counts = self.repository.status_counts().await?;
        Ok(QueueSummary::from_counts(&counts))
    }

    /// 1-indexed position of a pending job in FIFO order.
    pub async fn queue_position(&self, job: &Job) -> JobResult<u64> {
        let before = self
            .repository
            .pending_before(job.created_at, job.id)
            .await?;
        Ok(before + 1)
    }

    /// Completed-job statistics: (total completed, average generation time).
    pub async fn completed_stats(&self) -> JobResult<(u64, Option<f64>)> {
        self.repository.completed_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationSettings;
    use crate::repository::MockJobRepository;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn job_with_status(status: JobStatus) -> Job {
        Job {
            id: Uuid::now_v7(),
            status,
            original_filename: "photo.png".to_string(),
            input_path: "x/input.png".to_string(),
            input_hash: "deadbeef".to_string(),
            submitter: "203.0.113.7".to_string(),
            user_agent: None,
            settings: serde_json::to_value(GenerationSettings::default()).unwrap(),
            current_step: None,
            progress_pct: 0,
            progress_message: None,
            stl_path: None,
            glb_path: None,
            vertex_count: None,
            face_count: None,
            is_watertight: None,
            generation_time_s: None,
            gpu_metrics: None,
            error_message: None,
            error_step: None,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_record_progress_flips_assigned_to_processing() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Assigned);
        let id = job.id;

        repo.expect_find_by_id()
            .with(eq(id))
            .returning(move |_| Ok(Some(job.clone())));
        repo.expect_update()
            .withf(move |got_id, patch| {
                *got_id == id
                    && patch.status == Some(JobStatus::Processing)
                    && patch.progress_pct == Some(10)
            })
            .returning(|_, _| Ok(job_with_status(JobStatus::Processing)));

        let service = QueueService::new(repo);
        let updated = service
            .record_progress(
                id,
                ProgressUpdate {
                    step: Some("removing_background".to_string()),
                    pct: 10,
                    message: None,
                },
            )
            .await
            .unwrap();
        assert!(updated.is_some());
    }

    #[tokio::test]
    async fn test_record_progress_does_not_reflip_processing() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Processing);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        repo.expect_update()
            .withf(|_, patch| patch.status.is_none())
            .returning(|_, _| Ok(job_with_status(JobStatus::Processing)));

        let service = QueueService::new(repo);
        service
            .record_progress(
                id,
                ProgressUpdate {
                    step: Some("gen".to_string()),
                    pct: 50,
                    message: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_progress_clamps_regression_forward() {
        let mut repo = MockJobRepository::new();
        let mut job = job_with_status(JobStatus::Processing);
        job.progress_pct = 60;
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        repo.expect_update()
            .withf(|_, patch| patch.progress_pct == Some(60))
            .returning(|_, _| Ok(job_with_status(JobStatus::Processing)));

        let service = QueueService::new(repo);
        service
            .record_progress(
                id,
                ProgressUpdate {
                    step: None,
                    pct: 40, // regression
                    message: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_progress_dropped_after_terminal() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Complete);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        // No update expected

        let service = QueueService::new(repo);
        let result = service
            .record_progress(
                id,
                ProgressUpdate {
                    step: None,
                    pct: 99,
                    message: None,
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_mark_complete_repeat_is_noop() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Complete);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        // No update expected

        let service = QueueService::new(repo);
        let result = service.mark_complete(id, MeshOutput::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mark_complete_rejected_from_failed() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Failed);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));

        let service = QueueService::new(repo);
        let result = service.mark_complete(id, MeshOutput::default()).await;
        assert!(matches!(
            result,
            Err(JobError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Complete,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_mark_complete_sets_result_fields() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Processing);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        repo.expect_update()
            .withf(|_, patch| {
                patch.status == Some(JobStatus::Complete)
                    && patch.progress_pct == Some(100)
                    && patch.current_step == Some(Some("complete".to_string()))
                    && patch.vertex_count == Some(Some(12345))
                    && patch.completed_at.as_ref().is_some_and(|c| c.is_some())
            })
            .returning(|_, _| Ok(job_with_status(JobStatus::Complete)));

        let service = QueueService::new(repo);
        service
            .mark_complete(
                id,
                MeshOutput {
                    stl_path: Some("x/model.stl".to_string()),
                    vertex_count: 12345,
                    face_count: 24680,
                    is_watertight: true,
                    generation_time_s: 42.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_failed_repeat_is_noop() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Failed);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));

        let service = QueueService::new(repo);
        let result = service.mark_failed(id, "boom", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retry_rejects_non_terminal() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Processing);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));

        let service = QueueService::new(repo);
        let result = service.retry(id).await;
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_retry_clears_derived_fields() {
        let mut repo = MockJobRepository::new();
        let job = job_with_status(JobStatus::Expired);
        let id = job.id;

        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(job.clone())));
        repo.expect_update()
            .withf(|_, patch| {
                patch.status == Some(JobStatus::Pending)
                    && patch.progress_pct == Some(0)
                    && patch.error_message == Some(None)
                    && patch.assigned_at == Some(None)
                    && patch.completed_at == Some(None)
                    && patch.stl_path == Some(None)
            })
            .returning(|_, _| Ok(job_with_status(JobStatus::Pending)));

        let service = QueueService::new(repo);
        service.retry(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let mut repo = MockJobRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));

        let service = QueueService::new(repo);
        let result = service.get_job(Uuid::now_v7()).await;
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }
}
