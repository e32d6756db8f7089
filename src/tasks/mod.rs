use std::sync::Arc;
use std::time::{Duration, Instant};

use s3::error::S3Error;
use sqlx::PgPool;
use tokio::time::timeout;

use crate::db::{dataset_queries, job_queries};
use crate::models::job::JobStatus;
use crate::services::queue::{QueueError, TaskPayload, TaskQueue};
use crate::services::storage::{ObjectStore, StorageError};

pub mod chunk;
pub mod split;

/// Warn when a task runs longer than this.
const SOFT_TIME_LIMIT: Duration = Duration::from_secs(300);
/// Abort the task future entirely past this; the delivery counts as a
/// transient failure and goes through the normal retry path.
const HARD_TIME_LIMIT: Duration = Duration::from_secs(360);

/// Task failure taxonomy. Transient failures are re-enqueued with backoff up
/// to the retry cap; permanent failures mark the job failed immediately.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl TaskError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(e: sqlx::Error) -> Self {
        Self::Transient(format!("database error: {e}"))
    }
}

impl From<QueueError> for TaskError {
    fn from(e: QueueError) -> Self {
        Self::Transient(format!("queue error: {e}"))
    }
}

/// Storage failures are retried except for a missing object, which no retry
/// will bring back.
pub(crate) fn storage_error(e: StorageError) -> TaskError {
    match &e {
        StorageError::S3(S3Error::HttpFailWithBody(404, _)) => {
            TaskError::Permanent(format!("object not found: {e}"))
        }
        _ => TaskError::Transient(format!("storage error: {e}")),
    }
}

/// Everything a task execution needs, shared by the worker loop.
pub struct TaskContext {
    pub db: PgPool,
    pub storage: Arc<ObjectStore>,
    pub queue: Arc<TaskQueue>,
    /// Maximum data lines per chunk object produced by the split task.
    pub chunk_lines: usize,
}

/// Maps task payloads to their implementations. Built once at worker startup
/// and passed by reference into the poll loop.
pub struct TaskRegistry {
    ctx: TaskContext,
}

impl TaskRegistry {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Execute one task under the soft/hard time limits.
    pub async fn dispatch(&self, task: &TaskPayload) -> Result<(), TaskError> {
        let started = Instant::now();

        let result = match task {
            TaskPayload::SplitJob { job_id, .. } => {
                timeout(HARD_TIME_LIMIT, split::run(&self.ctx, *job_id)).await
            }
            TaskPayload::ProcessChunk {
                job_id,
                chunk_index,
                storage_key,
                ..
            } => {
                timeout(
                    HARD_TIME_LIMIT,
                    chunk::run(&self.ctx, *job_id, *chunk_index, storage_key),
                )
                .await
            }
        };

        let elapsed = started.elapsed();
        if elapsed > SOFT_TIME_LIMIT {
            tracing::warn!(
                job_id = %task.job_id(),
                elapsed_secs = elapsed.as_secs(),
                "Task exceeded soft time limit"
            );
        }

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TaskError::Transient(format!(
                "task exceeded hard time limit of {}s",
                HARD_TIME_LIMIT.as_secs()
            ))),
        }
    }
}

/// Persist a terminal task failure.
///
/// A chunk failure is terminal for that chunk only: siblings keep running
/// and the job stays `processing` until every chunk resolves, at which point
/// the last resolver finalizes it as `error` (inside `fail_chunk` /
/// `complete_chunk`). A split failure has nothing scheduled yet, so it fails
/// the job and dataset directly. Cancelled jobs keep their state.
pub async fn record_failure(
    ctx: &TaskContext,
    task: &TaskPayload,
    error: &str,
) -> Result<(), sqlx::Error> {
    let job_id = task.job_id();

    match task {
        TaskPayload::ProcessChunk { chunk_index, .. } => {
            let completion = job_queries::fail_chunk(&ctx.db, job_id, *chunk_index, error).await?;
            metrics::counter!("ingest_chunks_failed").increment(1);
            if completion.finalized {
                metrics::counter!("ingest_jobs_failed").increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    chunks_failed = completion.chunks_failed,
                    total_chunks = completion.total_chunks,
                    "All chunks resolved with failures, job marked as error"
                );
            }
        }
        TaskPayload::SplitJob { .. } => {
            let Some(job) = job_queries::get_job(&ctx.db, job_id, None).await? else {
                return Ok(());
            };
            if job.status == JobStatus::Cancelled {
                return Ok(());
            }

            job_queries::set_job_status(&ctx.db, job_id, JobStatus::Error).await?;
            dataset_queries::set_error(&ctx.db, job.dataset_id).await?;
            metrics::counter!("ingest_jobs_failed").increment(1);
        }
    }

    Ok(())
}
