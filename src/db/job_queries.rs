use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{ChunkStatus, Job, JobChunk, JobStatus, JobType};

const JOB_COLUMNS: &str = "job_id, dataset_id, user_id, job_type, storage_key, status, \
                           total_chunks, chunks_done, chunks_failed, rows_ingested, created_at";

fn map_job(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let type_str: String = row.try_get("job_type")?;
    Ok(Job {
        job_id: row.try_get("job_id")?,
        dataset_id: row.try_get("dataset_id")?,
        user_id: row.try_get("user_id")?,
        job_type: JobType::from_str(&type_str).unwrap_or(JobType::Transaction),
        storage_key: row.try_get("storage_key")?,
        status: JobStatus::from_str(&status_str).unwrap_or(JobStatus::Queued),
        total_chunks: row.try_get("total_chunks")?,
        chunks_done: row.try_get("chunks_done")?,
        chunks_failed: row.try_get("chunks_failed")?,
        rows_ingested: row.try_get("rows_ingested")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_chunk(row: &PgRow) -> Result<JobChunk, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(JobChunk {
        job_id: row.try_get("job_id")?,
        chunk_index: row.try_get("chunk_index")?,
        storage_key: row.try_get("storage_key")?,
        status: ChunkStatus::from_str(&status_str).unwrap_or(ChunkStatus::Queued),
        error: row.try_get("error")?,
    })
}

/// Insert a new ingestion job in `queued` state.
pub async fn create_job(
    pool: &PgPool,
    job_id: Uuid,
    dataset_id: i64,
    user_id: i64,
    job_type: JobType,
    storage_key: &str,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO jobs (job_id, dataset_id, user_id, job_type, storage_key, status) \
         VALUES ($1, $2, $3, $4, $5, 'queued') \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(job_id)
    .bind(dataset_id)
    .bind(user_id)
    .bind(job_type.to_string())
    .bind(storage_key)
    .fetch_one(pool)
    .await?;

    map_job(&row)
}

/// Get a job by id, optionally scoped to its owner.
pub async fn get_job(
    pool: &PgPool,
    job_id: Uuid,
    user_id: Option<i64>,
) -> Result<Option<Job>, sqlx::Error> {
    let row = match user_id {
        Some(uid) => {
            sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 AND user_id = $2"
            ))
            .bind(job_id)
            .bind(uid)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
                .bind(job_id)
                .fetch_optional(pool)
                .await?
        }
    };

    row.as_ref().map(map_job).transpose()
}

/// List a user's jobs, most recent first.
pub async fn list_jobs(pool: &PgPool, user_id: i64, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_job).collect()
}

/// Update job status.
pub async fn set_job_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = $1 WHERE job_id = $2")
        .bind(status.to_string())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reset progress counters and re-enter `processing` for a job retry.
pub async fn reset_for_retry(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE jobs SET status = 'processing', total_chunks = 0, chunks_done = 0, \
         chunks_failed = 0, rows_ingested = 0 WHERE job_id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Register the chunks produced by splitting, atomically with setting
/// `total_chunks`, so no worker can observe chunk rows without the total.
///
/// Re-splitting on retry supersedes old chunk rows in place (the chunk
/// object keys are deterministic per job and index).
pub async fn register_chunks(
    pool: &PgPool,
    job_id: Uuid,
    chunk_keys: &[String],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for (index, key) in chunk_keys.iter().enumerate() {
        sqlx::query(
            "INSERT INTO job_chunks (job_id, chunk_index, storage_key, status) \
             VALUES ($1, $2, $3, 'queued') \
             ON CONFLICT (job_id, chunk_index) \
             DO UPDATE SET storage_key = EXCLUDED.storage_key, status = 'queued', error = NULL",
        )
        .bind(job_id)
        .bind(index as i32)
        .bind(key)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE jobs SET total_chunks = $1 WHERE job_id = $2")
        .bind(chunk_keys.len() as i32)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// List a job's chunks in index order.
pub async fn get_chunks(pool: &PgPool, job_id: Uuid) -> Result<Vec<JobChunk>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT job_id, chunk_index, storage_key, status, error \
         FROM job_chunks WHERE job_id = $1 ORDER BY chunk_index",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_chunk).collect()
}

/// Outcome of resolving one chunk (done or failed): the post-increment
/// counters and whether this call performed the dataset/job finalization.
#[derive(Debug)]
pub struct ChunkCompletion {
    pub chunks_done: i32,
    pub chunks_failed: i32,
    pub total_chunks: i32,
    pub finalized: bool,
}

/// Mark a chunk done and atomically increment the job's `chunks_done` and
/// `rows_ingested` counters. The increment is a single UPDATE returning the
/// post-increment values, so concurrent resolutions each observe a distinct
/// count and exactly one sees `chunks_done + chunks_failed == total_chunks`;
/// that caller finalizes the dataset and the job within the same
/// transaction, closing the last-chunk race. A job with any failed sibling
/// finalizes as `error` even when this last chunk succeeded.
pub async fn complete_chunk(
    pool: &PgPool,
    job_id: Uuid,
    chunk_index: i32,
    lines_consumed: i64,
) -> Result<ChunkCompletion, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE job_chunks SET status = 'done', error = NULL \
         WHERE job_id = $1 AND chunk_index = $2",
    )
    .bind(job_id)
    .bind(chunk_index)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        "UPDATE jobs SET chunks_done = chunks_done + 1, rows_ingested = rows_ingested + $1 \
         WHERE job_id = $2 \
         RETURNING chunks_done, chunks_failed, total_chunks, rows_ingested, dataset_id",
    )
    .bind(lines_consumed)
    .bind(job_id)
    .fetch_one(&mut *tx)
    .await?;

    let chunks_done: i32 = row.try_get("chunks_done")?;
    let chunks_failed: i32 = row.try_get("chunks_failed")?;
    let total_chunks: i32 = row.try_get("total_chunks")?;
    let rows_ingested: i64 = row.try_get("rows_ingested")?;
    let dataset_id: i64 = row.try_get("dataset_id")?;

    let finalized = total_chunks > 0 && chunks_done + chunks_failed == total_chunks;
    if finalized {
        if chunks_failed == 0 {
            sqlx::query(
                "UPDATE datasets SET status = 'completed', row_count = $1 \
                 WHERE id = $2 AND status = 'pending'",
            )
            .bind(rows_ingested)
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE jobs SET status = 'completed' WHERE job_id = $1 AND status = 'processing'",
            )
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        } else {
            finalize_error(&mut tx, job_id, dataset_id).await?;
        }
    }

    tx.commit().await?;

    Ok(ChunkCompletion {
        chunks_done,
        chunks_failed,
        total_chunks,
        finalized,
    })
}

/// Mark a chunk failed with its error message and atomically increment the
/// job's `chunks_failed` counter. A chunk failure is terminal for the chunk
/// only: the job stays `processing` until every sibling resolves, and the
/// resolver that covers the last chunk finalizes the job (and dataset) as
/// `error` in the same transaction.
pub async fn fail_chunk(
    pool: &PgPool,
    job_id: Uuid,
    chunk_index: i32,
    error: &str,
) -> Result<ChunkCompletion, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE job_chunks SET status = 'failed', error = $1 \
         WHERE job_id = $2 AND chunk_index = $3",
    )
    .bind(error)
    .bind(job_id)
    .bind(chunk_index)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        "UPDATE jobs SET chunks_failed = chunks_failed + 1 \
         WHERE job_id = $1 \
         RETURNING chunks_done, chunks_failed, total_chunks, dataset_id",
    )
    .bind(job_id)
    .fetch_one(&mut *tx)
    .await?;

    let chunks_done: i32 = row.try_get("chunks_done")?;
    let chunks_failed: i32 = row.try_get("chunks_failed")?;
    let total_chunks: i32 = row.try_get("total_chunks")?;
    let dataset_id: i64 = row.try_get("dataset_id")?;

    let finalized = total_chunks > 0 && chunks_done + chunks_failed == total_chunks;
    if finalized {
        finalize_error(&mut tx, job_id, dataset_id).await?;
    }

    tx.commit().await?;

    Ok(ChunkCompletion {
        chunks_done,
        chunks_failed,
        total_chunks,
        finalized,
    })
}

/// Terminal `error` transition for job and dataset, guarded so a cancelled
/// job or an already-finalized dataset is left untouched.
async fn finalize_error(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: Uuid,
    dataset_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = 'error' WHERE job_id = $1 AND status = 'processing'")
        .bind(job_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE datasets SET status = 'error' WHERE id = $1 AND status = 'pending'")
        .bind(dataset_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
