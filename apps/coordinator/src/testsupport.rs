//! In-memory fakes for exercising the bridge, dispatch loop and reaper
//! without PostgreSQL or a filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_jobs::{
    Job, JobError, JobPatch, JobRepository, JobResult, JobStatus, NewJob,
};
use storage::{Storage, StorageError, StorageResult};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_patch(job: &mut Job, patch: JobPatch) {
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(step) = patch.current_step {
            job.current_step = step;
        }
        if let Some(pct) = patch.progress_pct {
            job.progress_pct = pct;
        }
        if let Some(message) = patch.progress_message {
            job.progress_message = message;
        }
        if let Some(stl_path) = patch.stl_path {
            job.stl_path = stl_path;
        }
        if let Some(glb_path) = patch.glb_path {
            job.glb_path = glb_path;
        }
        if let Some(vertex_count) = patch.vertex_count {
            job.vertex_count = vertex_count;
        }
        if let Some(face_count) = patch.face_count {
            job.face_count = face_count;
        }
        if let Some(is_watertight) = patch.is_watertight {
            job.is_watertight = is_watertight;
        }
        if let Some(generation_time_s) = patch.generation_time_s {
            job.generation_time_s = generation_time_s;
        }
        if let Some(gpu_metrics) = patch.gpu_metrics {
            job.gpu_metrics = gpu_metrics;
        }
        if let Some(error_message) = patch.error_message {
            job.error_message = error_message;
        }
        if let Some(error_step) = patch.error_step {
            job.error_step = error_step;
        }
        if let Some(assigned_at) = patch.assigned_at {
            job.assigned_at = assigned_at;
        }
        if let Some(completed_at) = patch.completed_at {
            job.completed_at = completed_at;
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, input: NewJob) -> JobResult<Job> {
        let job = Job {
            id: input.id,
            status: JobStatus::Pending,
            original_filename: input.original_filename,
            input_path: input.input_path,
            input_hash: input.input_hash,
            submitter: input.submitter,
            user_agent: input.user_agent,
            settings: input.settings,
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
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn claim_next_pending(&self) -> JobResult<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();

        if jobs.values().any(|job| job.status.is_in_flight()) {
            return Ok(None);
        }

        let next = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by_key(|job| (job.created_at, job.id))
            .map(|job| job.id);

        Ok(next.map(|id| {
            let job = jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Assigned;
            job.assigned_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> JobResult<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        Self::apply_patch(job, patch);
        Ok(job.clone())
    }

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> JobResult<Vec<Uuid>> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut expired = Vec::new();
        for job in jobs.values_mut() {
            if job.status.is_in_flight() && job.assigned_at.is_some_and(|at| at < cutoff) {
                job.status = JobStatus::Expired;
                job.error_message = Some("Job timed out".to_string());
                job.completed_at = Some(Utc::now());
                expired.push(job.id);
            }
        }
        Ok(expired)
    }

    async fn reset_orphaned(&self) -> JobResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut reset = 0;
        for job in jobs.values_mut() {
            if job.status.is_in_flight() {
                job.status = JobStatus::Pending;
                job.assigned_at = None;
                job.current_step = None;
                job.progress_pct = 0;
                job.progress_message = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.values().filter(|job| job.status == status).count() as u64)
    }

    async fn status_counts(&self) -> JobResult<Vec<(JobStatus, u64)>> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts: HashMap<JobStatus, u64> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn pending_before(&self, created_at: DateTime<Utc>, id: Uuid) -> JobResult<u64> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Pending && (job.created_at, job.id) < (created_at, id)
            })
            .count() as u64)
    }

    async fn completed_stats(&self) -> JobResult<(u64, Option<f64>)> {
        let jobs = self.jobs.lock().unwrap();
        let times: Vec<f64> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Complete)
            .filter_map(|job| job.generation_time_s)
            .collect();
        let total = jobs
            .values()
            .filter(|job| job.status == JobStatus::Complete)
            .count() as u64;
        let avg = if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        };
        Ok((total, avg))
    }
}

#[derive(Default)]
pub struct MemStorage {
    pub inputs: Mutex<HashMap<String, Vec<u8>>>,
    pub outputs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn save_input(&self, data: &[u8], key: &str) -> StorageResult<()> {
        self.inputs
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_input(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inputs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn save_output(&self, data: &[u8], key: &str) -> StorageResult<()> {
        self.outputs
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_output(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.outputs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn output_path(&self, key: &str) -> StorageResult<std::path::PathBuf> {
        Ok(std::path::PathBuf::from(key))
    }

    async fn delete(&self, input_keys: &[String], output_keys: &[String]) -> StorageResult<()> {
        let mut inputs = self.inputs.lock().unwrap();
        for key in input_keys {
            inputs.remove(key);
        }
        let mut outputs = self.outputs.lock().unwrap();
        for key in output_keys {
            outputs.remove(key);
        }
        Ok(())
    }
}
