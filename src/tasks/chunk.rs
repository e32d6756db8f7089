use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{dataset_queries, job_queries, row_queries};
use crate::models::job::JobStatus;
use crate::services::aggregate::{aggregate, AggregatedRows};
use crate::services::parser::parse_chunk;
use crate::tasks::{storage_error, TaskContext, TaskError};

/// Process one chunk object: download, parse, aggregate, upsert, and bump
/// the job's counters. The caller that observes `chunks_done ==
/// total_chunks` finalizes the dataset inside `complete_chunk`.
pub async fn run(
    ctx: &TaskContext,
    job_id: Uuid,
    chunk_index: i32,
    storage_key: &str,
) -> Result<(), TaskError> {
    let started = Instant::now();

    let job = job_queries::get_job(&ctx.db, job_id, None)
        .await?
        .ok_or_else(|| TaskError::Permanent(format!("job {job_id} no longer exists")))?;

    if job.status == JobStatus::Cancelled {
        tracing::info!(job_id = %job_id, chunk_index, "Job cancelled, skipping chunk");
        return Ok(());
    }

    // The dataset row is the ingestion target; without it there is nothing
    // to attribute rows to and no retry will help.
    let dataset = dataset_queries::get_dataset(&ctx.db, job.dataset_id, job.user_id)
        .await?
        .ok_or_else(|| {
            TaskError::Permanent(format!("dataset {} no longer exists", job.dataset_id))
        })?;

    let bytes = ctx.storage.get(storage_key).await.map_err(storage_error)?;

    let parsed = parse_chunk(&bytes, job.job_type, Utc::now().date_naive())
        .map_err(|e| TaskError::Permanent(format!("unreadable chunk: {e}")))?;
    for warning in &parsed.warnings {
        tracing::warn!(job_id = %job_id, chunk_index, warning = %warning, "Chunk normalization warning");
    }

    let aggregation = aggregate(job.user_id, &parsed);
    let row_count = aggregation.rows.len();

    match &aggregation.rows {
        AggregatedRows::Transactions(records) => {
            row_queries::upsert_transaction_rows(&ctx.db, dataset.id, job.user_id, records)
                .await?;
        }
        AggregatedRows::Clicks(records) => {
            row_queries::upsert_click_rows(&ctx.db, dataset.id, job.user_id, records).await?;
        }
    }

    let completion =
        job_queries::complete_chunk(&ctx.db, job_id, chunk_index, aggregation.line_count as i64)
            .await?;

    metrics::counter!("ingest_chunks_processed").increment(1);
    metrics::counter!("ingest_rows_upserted").increment(row_count as u64);
    metrics::histogram!("chunk_processing_seconds").record(started.elapsed().as_secs_f64());

    tracing::info!(
        job_id = %job_id,
        chunk_index,
        lines = aggregation.line_count,
        rows = row_count,
        chunks_done = completion.chunks_done,
        total_chunks = completion.total_chunks,
        "Chunk processed"
    );

    if completion.finalized {
        if completion.chunks_failed == 0 {
            metrics::counter!("ingest_jobs_completed").increment(1);
            tracing::info!(job_id = %job_id, dataset_id = dataset.id, "Last chunk done, job completed");
        } else {
            metrics::counter!("ingest_jobs_failed").increment(1);
            tracing::warn!(
                job_id = %job_id,
                dataset_id = dataset.id,
                chunks_failed = completion.chunks_failed,
                "All chunks resolved but some failed, job marked as error"
            );
        }
    }

    Ok(())
}
