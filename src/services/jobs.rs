use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{dataset_queries, job_queries};
use crate::models::dataset::Dataset;
use crate::models::job::{Job, JobChunk, JobStatus, JobType};
use crate::services::queue::{QueueError, TaskPayload, TaskQueue};
use crate::services::storage::{ObjectStore, StorageError};

/// Orchestrates the job lifecycle: create with a presigned upload, commit
/// once the bytes are in storage, expose status, and drive retry/cancel.
/// Splitting and chunk processing happen in the worker; this service only
/// schedules them.
pub struct JobService {
    db: PgPool,
    storage: Option<Arc<ObjectStore>>,
    queue: Arc<TaskQueue>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("object storage is not configured")]
    StorageUnconfigured,

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("job not found")]
    NotFound,

    #[error("source file has not been uploaded yet")]
    SourceMissing,

    #[error("job cannot be committed from state '{0}'")]
    NotCommittable(JobStatus),

    #[error("job cannot be retried from state '{0}'")]
    NotRetryable(JobStatus),

    #[error("job already finished in state '{0}'")]
    AlreadyFinished(JobStatus),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of `create_job`: the persisted records plus the URL the client
/// uploads the file bytes to.
#[derive(Debug)]
pub struct CreatedJob {
    pub job: Job,
    pub dataset: Dataset,
    pub upload_url: String,
}

/// Result of `init_multipart`: as `CreatedJob`, but with a storage-side
/// multipart upload id instead of a single presigned URL.
#[derive(Debug)]
pub struct MultipartJob {
    pub job: Job,
    pub dataset: Dataset,
    pub upload_id: String,
}

/// Status snapshot: the job with its per-chunk states and errors.
#[derive(Debug)]
pub struct JobSnapshot {
    pub job: Job,
    pub chunks: Vec<JobChunk>,
}

impl JobService {
    pub fn new(db: PgPool, storage: Option<Arc<ObjectStore>>, queue: Arc<TaskQueue>) -> Self {
        Self { db, storage, queue }
    }

    fn storage(&self) -> Result<&ObjectStore, JobError> {
        self.storage.as_deref().ok_or(JobError::StorageUnconfigured)
    }

    /// Create a pending dataset, a queued job, and the presigned PUT URL for
    /// the source file. No processing is scheduled until `commit_job`.
    pub async fn create_job(
        &self,
        user_id: i64,
        filename: &str,
        job_type: JobType,
    ) -> Result<CreatedJob, JobError> {
        let storage = self.storage()?;
        let filename = validate_filename(filename)?;

        let dataset = dataset_queries::create_dataset(&self.db, user_id, filename, job_type).await?;

        let job_id = Uuid::new_v4();
        let storage_key = format!("uploads/{job_id}/{filename}");
        let job = job_queries::create_job(
            &self.db,
            job_id,
            dataset.id,
            user_id,
            job_type,
            &storage_key,
        )
        .await?;

        let upload_url = storage.presigned_put_url(&storage_key).await?;

        metrics::counter!("ingest_jobs_total").increment(1);
        tracing::info!(
            job_id = %job.job_id,
            dataset_id = dataset.id,
            user_id,
            job_type = %job_type,
            "Job created"
        );

        Ok(CreatedJob {
            job,
            dataset,
            upload_url,
        })
    }

    /// Commit an uploaded job: verify the object actually exists, move the
    /// job to `processing`, and enqueue the split task.
    pub async fn commit_job(&self, user_id: i64, job_id: Uuid) -> Result<Job, JobError> {
        let storage = self.storage()?;
        let job = self.owned_job(user_id, job_id).await?;

        if job.status != JobStatus::Queued {
            return Err(JobError::NotCommittable(job.status));
        }
        if !storage.exists(&job.storage_key).await? {
            return Err(JobError::SourceMissing);
        }

        job_queries::set_job_status(&self.db, job_id, JobStatus::Processing).await?;
        self.queue
            .enqueue(&TaskPayload::SplitJob { job_id, attempt: 0 })
            .await?;

        tracing::info!(job_id = %job_id, "Job committed, split task enqueued");

        job_queries::get_job(&self.db, job_id, Some(user_id))
            .await?
            .ok_or(JobError::NotFound)
    }

    /// Status snapshot for polling clients: counters plus chunk errors.
    pub async fn get_job(&self, user_id: i64, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        let job = self.owned_job(user_id, job_id).await?;
        let chunks = job_queries::get_chunks(&self.db, job_id).await?;
        Ok(JobSnapshot { job, chunks })
    }

    /// A user's jobs, most recent first.
    pub async fn list_jobs(&self, user_id: i64, limit: i64) -> Result<Vec<Job>, JobError> {
        Ok(job_queries::list_jobs(&self.db, user_id, limit.clamp(1, 200)).await?)
    }

    /// Re-run a job from its stored source file: failures, cancellations,
    /// and jobs stranded in `queued`/`processing` by a lost worker. The
    /// whole job is resubmitted; chunk rows are superseded by the re-split.
    pub async fn retry_job(&self, user_id: i64, job_id: Uuid) -> Result<Job, JobError> {
        let storage = self.storage()?;
        let job = self.owned_job(user_id, job_id).await?;

        if !job.status.is_retryable() {
            return Err(JobError::NotRetryable(job.status));
        }
        // The source object may have been cleaned up since the job failed.
        if !storage.exists(&job.storage_key).await? {
            return Err(JobError::SourceMissing);
        }

        job_queries::reset_for_retry(&self.db, job_id).await?;
        self.queue
            .enqueue(&TaskPayload::SplitJob { job_id, attempt: 0 })
            .await?;

        tracing::info!(job_id = %job_id, "Job resubmitted");

        job_queries::get_job(&self.db, job_id, Some(user_id))
            .await?
            .ok_or(JobError::NotFound)
    }

    /// Cancel a job that has not finished. Workers observe the state and
    /// stop scheduling further work; in-flight chunks are allowed to drain.
    pub async fn cancel_job(&self, user_id: i64, job_id: Uuid) -> Result<Job, JobError> {
        let job = self.owned_job(user_id, job_id).await?;

        if job.status.is_terminal() {
            return Err(JobError::AlreadyFinished(job.status));
        }

        job_queries::set_job_status(&self.db, job_id, JobStatus::Cancelled).await?;
        tracing::info!(job_id = %job_id, "Job cancelled");

        job_queries::get_job(&self.db, job_id, Some(user_id))
            .await?
            .ok_or(JobError::NotFound)
    }

    /// Start a multipart upload for a large source file. Creates the same
    /// dataset/job pair as `create_job`; parts are uploaded against the
    /// returned upload id.
    pub async fn init_multipart(
        &self,
        user_id: i64,
        filename: &str,
        job_type: JobType,
    ) -> Result<MultipartJob, JobError> {
        let storage = self.storage()?;
        let filename = validate_filename(filename)?;

        let dataset = dataset_queries::create_dataset(&self.db, user_id, filename, job_type).await?;

        let job_id = Uuid::new_v4();
        let storage_key = format!("uploads/{job_id}/{filename}");
        let job = job_queries::create_job(
            &self.db,
            job_id,
            dataset.id,
            user_id,
            job_type,
            &storage_key,
        )
        .await?;

        let upload_id = storage.start_multipart(&storage_key).await?;

        metrics::counter!("ingest_jobs_total").increment(1);
        tracing::info!(job_id = %job.job_id, upload_id = %upload_id, "Multipart upload started");

        Ok(MultipartJob {
            job,
            dataset,
            upload_id,
        })
    }

    /// Presigned URL for one part of a multipart upload.
    pub async fn multipart_part_url(
        &self,
        user_id: i64,
        job_id: Uuid,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, JobError> {
        let storage = self.storage()?;
        let job = self.owned_job(user_id, job_id).await?;
        Ok(storage
            .presigned_part_url(&job.storage_key, upload_id, part_number)
            .await?)
    }

    /// Complete a multipart upload and commit the job in one step.
    pub async fn complete_multipart(
        &self,
        user_id: i64,
        job_id: Uuid,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> Result<Job, JobError> {
        let storage = self.storage()?;
        let job = self.owned_job(user_id, job_id).await?;

        if job.status != JobStatus::Queued {
            return Err(JobError::NotCommittable(job.status));
        }

        storage
            .complete_multipart(&job.storage_key, upload_id, parts)
            .await?;

        job_queries::set_job_status(&self.db, job_id, JobStatus::Processing).await?;
        self.queue
            .enqueue(&TaskPayload::SplitJob { job_id, attempt: 0 })
            .await?;

        tracing::info!(job_id = %job_id, "Multipart upload completed, split task enqueued");

        job_queries::get_job(&self.db, job_id, Some(user_id))
            .await?
            .ok_or(JobError::NotFound)
    }

    /// Abort a multipart upload and cancel its job.
    pub async fn abort_multipart(
        &self,
        user_id: i64,
        job_id: Uuid,
        upload_id: &str,
    ) -> Result<Job, JobError> {
        let storage = self.storage()?;
        let job = self.owned_job(user_id, job_id).await?;

        storage.abort_multipart(&job.storage_key, upload_id).await?;
        self.cancel_job(user_id, job_id).await
    }

    async fn owned_job(&self, user_id: i64, job_id: Uuid) -> Result<Job, JobError> {
        job_queries::get_job(&self.db, job_id, Some(user_id))
            .await?
            .ok_or(JobError::NotFound)
    }
}

/// Source files must be plain `.csv` names without path components.
fn validate_filename(filename: &str) -> Result<&str, JobError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(JobError::InvalidUpload("filename is empty".to_string()));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
        return Err(JobError::InvalidUpload(
            "filename must not contain path components".to_string(),
        ));
    }
    if !trimmed.to_ascii_lowercase().ends_with(".csv") {
        return Err(JobError::InvalidUpload(
            "only .csv files are accepted".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation() {
        assert!(validate_filename("report.csv").is_ok());
        assert!(validate_filename("Relatório de Vendas.CSV").is_ok());
        assert!(validate_filename("  padded.csv  ").is_ok());

        assert!(validate_filename("").is_err());
        assert!(validate_filename("report.xlsx").is_err());
        assert!(validate_filename("../escape.csv").is_err());
        assert!(validate_filename("dir/report.csv").is_err());
    }
}
