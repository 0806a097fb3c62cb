use std::sync::Arc;

use axum_helpers::audit::{AuditEvent, AuditOutcome};
use tracing::{info, instrument};

use crate::error::{JobError, JobResult};
use crate::gatekeeper::Gatekeeper;
use crate::models::{AdmissionTicket, GenerationSettings, NewJob};
use crate::queue::QueueService;
use crate::repository::JobRepository;
use crate::validator::validate_image;
use storage::Storage;

/// Admission limits, loaded from the coordinator config.
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    /// Submissions rejected with `queue_full` beyond this many pending jobs
    pub max_pending_jobs: u64,
    /// Upload size cap in bytes
    pub max_upload_bytes: usize,
}

/// A submission, as it arrives from the HTTP surface.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Opaque client identity (IP string)
    pub submitter: String,
    pub user_agent: Option<String>,
    pub filename: String,
    pub data: Vec<u8>,
}

/// The intake path: ban and quota checks, queue capacity, input validation,
/// persistence, and the immediate ticket back to the submitter.
pub struct AdmissionService<R: JobRepository, G: Gatekeeper, S: Storage> {
    queue: QueueService<R>,
    gatekeeper: Arc<G>,
    storage: Arc<S>,
    limits: AdmissionLimits,
    defaults: GenerationSettings,
}

impl<R: JobRepository, G: Gatekeeper, S: Storage> AdmissionService<R, G, S> {
    pub fn new(
        queue: QueueService<R>,
        gatekeeper: Arc<G>,
        storage: Arc<S>,
        limits: AdmissionLimits,
        defaults: GenerationSettings,
    ) -> Self {
        Self {
            queue,
            gatekeeper,
            storage,
            limits,
            defaults,
        }
    }

    /// Admit a submission or reject it with a specific error.
    ///
    /// Check order is fixed: ban, quota, queue capacity, input validation.
    /// Only after all pass is anything persisted.
    #[instrument(skip(self, submission), fields(submitter = %submission.submitter))]
    pub async fn submit(&self, submission: Submission) -> JobResult<AdmissionTicket> {
        if self.gatekeeper.is_banned(&submission.submitter).await? {
            AuditEvent::new("upload", AuditOutcome::Denied)
                .with_ip(Some(submission.submitter.clone()))
                .with_detail("banned")
                .log();
            return Err(JobError::Banned);
        }

        let quota = self.gatekeeper.check_quota(&submission.submitter).await?;
        if !quota.allowed {
            AuditEvent::new("upload", AuditOutcome::Denied)
                .with_ip(Some(submission.submitter.clone()))
                .with_detail("rate_limited")
                .log();
            return Err(JobError::RateLimited);
        }

        let pending_before = self.queue.pending_count().await?;
        if pending_before >= self.limits.max_pending_jobs {
            return Err(JobError::QueueFull);
        }

        let validated = validate_image(&submission.data, self.limits.max_upload_bytes)?;

        let new_job = NewJob::new(
            submission.filename,
            validated.sha256,
            submission.submitter.clone(),
            submission.user_agent,
            &self.defaults,
            validated.ext,
        );

        // Input bytes land under the per-job key before the row exists, so a
        // claimed job always has its input on disk.
        self.storage
            .save_input(&submission.data, &new_job.input_path)
            .await?;

        let job = self.queue.enqueue(new_job).await?;
        self.gatekeeper.invalidate(&submission.submitter);

        AuditEvent::new("upload", AuditOutcome::Success)
            .with_job_id(job.id.to_string())
            .with_ip(Some(submission.submitter.clone()))
            .log();
        info!(job_id = %job.id, "Submission admitted");

        Ok(AdmissionTicket {
            job_id: job.id,
            status: job.status,
            queue_position: pending_before + 1,
            remaining_quota: quota.remaining.saturating_sub(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatekeeper::{MockGatekeeper, QuotaDecision};
    use crate::models::{Job, JobStatus};
    use crate::repository::MockJobRepository;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use storage::{StorageError, StorageResult};

    /// In-memory storage double
    #[derive(Default)]
    struct MemStorage {
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn save_input(&self, _data: &[u8], key: &str) -> StorageResult<()> {
            self.saved.lock().unwrap().push(key.to_string());
            Ok(())
        }

        async fn read_input(&self, key: &str) -> StorageResult<Vec<u8>> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn save_output(&self, _data: &[u8], _key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn read_output(&self, key: &str) -> StorageResult<Vec<u8>> {
            Err(StorageError::NotFound(key.to_string()))
        }

        fn output_path(&self, key: &str) -> StorageResult<std::path::PathBuf> {
            Ok(std::path::PathBuf::from(key))
        }

        async fn delete(&self, _: &[String], _: &[String]) -> StorageResult<()> {
            Ok(())
        }
    }

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-png";

    fn submission() -> Submission {
        Submission {
            submitter: "203.0.113.7".to_string(),
            user_agent: Some("curl/8".to_string()),
            filename: "photo.png".to_string(),
            data: PNG.to_vec(),
        }
    }

    fn limits() -> AdmissionLimits {
        AdmissionLimits {
            max_pending_jobs: 50,
            max_upload_bytes: 1024,
        }
    }

    fn pending_job(input: &NewJob) -> Job {
        Job {
            id: input.id,
            status: JobStatus::Pending,
            original_filename: input.original_filename.clone(),
            input_path: input.input_path.clone(),
            input_hash: input.input_hash.clone(),
            submitter: input.submitter.clone(),
            user_agent: input.user_agent.clone(),
            settings: input.settings.clone(),
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

    fn permissive_gatekeeper(remaining: u64) -> MockGatekeeper {
        let mut gate = MockGatekeeper::new();
        gate.expect_is_banned().returning(|_| Ok(false));
        gate.expect_check_quota().returning(move |_| {
            Ok(QuotaDecision {
                allowed: true,
                remaining,
            })
        });
        gate.expect_invalidate().return_const(());
        gate
    }

    #[tokio::test]
    async fn test_submit_happy_path() {
        let mut repo = MockJobRepository::new();
        repo.expect_count_by_status().returning(|_| Ok(3));
        repo.expect_insert()
            .returning(|input| Ok(pending_job(&input)));

        let storage = Arc::new(MemStorage::default());
        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(permissive_gatekeeper(20)),
            storage.clone(),
            limits(),
            GenerationSettings::default(),
        );

        let ticket = service.submit(submission()).await.unwrap();
        assert_eq!(ticket.status, JobStatus::Pending);
        assert_eq!(ticket.queue_position, 4);
        assert_eq!(ticket.remaining_quota, 19);

        let saved = storage.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].ends_with("/input.png"));
    }

    #[tokio::test]
    async fn test_submit_rejects_banned_before_anything_else() {
        let repo = MockJobRepository::new(); // no expectations: nothing persisted
        let mut gate = MockGatekeeper::new();
        gate.expect_is_banned().returning(|_| Ok(true));

        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(gate),
            Arc::new(MemStorage::default()),
            limits(),
            GenerationSettings::default(),
        );

        let result = service.submit(submission()).await;
        assert!(matches!(result, Err(JobError::Banned)));
    }

    #[tokio::test]
    async fn test_submit_rejects_over_quota() {
        let repo = MockJobRepository::new();
        let mut gate = MockGatekeeper::new();
        gate.expect_is_banned().returning(|_| Ok(false));
        gate.expect_check_quota().returning(|_| {
            Ok(QuotaDecision {
                allowed: false,
                remaining: 0,
            })
        });

        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(gate),
            Arc::new(MemStorage::default()),
            limits(),
            GenerationSettings::default(),
        );

        let result = service.submit(submission()).await;
        assert!(matches!(result, Err(JobError::RateLimited)));
    }

    #[tokio::test]
    async fn test_submit_rejects_full_queue() {
        let mut repo = MockJobRepository::new();
        repo.expect_count_by_status().returning(|_| Ok(50));

        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(permissive_gatekeeper(20)),
            Arc::new(MemStorage::default()),
            limits(),
            GenerationSettings::default(),
        );

        let result = service.submit(submission()).await;
        assert!(matches!(result, Err(JobError::QueueFull)));
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_image() {
        let mut repo = MockJobRepository::new();
        repo.expect_count_by_status().returning(|_| Ok(0));

        let storage = Arc::new(MemStorage::default());
        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(permissive_gatekeeper(20)),
            storage.clone(),
            limits(),
            GenerationSettings::default(),
        );

        let mut bad = submission();
        bad.data = b"GIF89a...".to_vec();
        let result = service.submit(bad).await;
        assert!(matches!(result, Err(JobError::Validation(_))));
        assert!(storage.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submitted_job_carries_default_settings() {
        let mut repo = MockJobRepository::new();
        repo.expect_count_by_status().returning(|_| Ok(0));
        repo.expect_insert()
            .withf(|input| {
                input.settings["steps"] == 50
                    && input.settings["guidance"] == 5.0
                    && input.settings["octree_res"] == 384
                    && input.settings["seed"] == 42
                    && input.settings["height_mm"] == 100.0
            })
            .returning(|input| Ok(pending_job(&input)));

        let service = AdmissionService::new(
            QueueService::new(repo),
            Arc::new(permissive_gatekeeper(20)),
            Arc::new(MemStorage::default()),
            limits(),
            GenerationSettings::default(),
        );

        service.submit(submission()).await.unwrap();
    }
}
