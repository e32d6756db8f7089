use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use uuid::Uuid;

use crate::db::{dataset_queries, job_queries};
use crate::models::job::JobStatus;
use crate::services::queue::TaskPayload;
use crate::services::storage::CSV_CONTENT_TYPE;
use crate::tasks::{storage_error, TaskContext, TaskError};

/// Split a committed job's source file into chunk objects and enqueue one
/// processing task per chunk.
///
/// Each chunk is a self-contained CSV (header repeated) persisted to storage
/// before anything is enqueued, so chunk processing never depends on worker
/// affinity or the source object staying put. Chunks are registered together
/// with `total_chunks` in one transaction before the first enqueue.
pub async fn run(ctx: &TaskContext, job_id: Uuid) -> Result<(), TaskError> {
    let job = job_queries::get_job(&ctx.db, job_id, None)
        .await?
        .ok_or_else(|| TaskError::Permanent(format!("job {job_id} no longer exists")))?;

    if job.status == JobStatus::Cancelled {
        tracing::info!(job_id = %job_id, "Job cancelled before split, dropping task");
        return Ok(());
    }

    tracing::info!(job_id = %job_id, storage_key = %job.storage_key, "Splitting source file");

    let bytes = ctx.storage.get(&job.storage_key).await.map_err(storage_error)?;
    let chunks = split_csv(&bytes, ctx.chunk_lines)
        .map_err(|e| TaskError::Permanent(format!("unreadable CSV: {e}")))?;

    if chunks.is_empty() {
        // A header-only (or empty) file is valid and immediately terminal.
        dataset_queries::finalize_empty(&ctx.db, job.dataset_id).await?;
        job_queries::set_job_status(&ctx.db, job_id, JobStatus::Completed).await?;
        metrics::counter!("ingest_jobs_completed").increment(1);
        tracing::info!(job_id = %job_id, "Source file has no data lines, job completed");
        return Ok(());
    }

    let mut chunk_keys = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let key = format!("jobs/{job_id}/chunks/{index}.csv");
        ctx.storage
            .put(&key, chunk, CSV_CONTENT_TYPE)
            .await
            .map_err(storage_error)?;
        chunk_keys.push(key);
    }

    job_queries::register_chunks(&ctx.db, job_id, &chunk_keys).await?;

    // Cancellation may have landed while we were uploading; stop before
    // scheduling any processing.
    let job = job_queries::get_job(&ctx.db, job_id, None)
        .await?
        .ok_or_else(|| TaskError::Permanent(format!("job {job_id} no longer exists")))?;
    if job.status == JobStatus::Cancelled {
        tracing::info!(job_id = %job_id, "Job cancelled during split, chunks not scheduled");
        return Ok(());
    }

    for (index, key) in chunk_keys.iter().enumerate() {
        ctx.queue
            .enqueue(&TaskPayload::ProcessChunk {
                job_id,
                chunk_index: index as i32,
                storage_key: key.clone(),
                attempt: 0,
            })
            .await?;
    }

    metrics::counter!("ingest_chunks_total").increment(chunk_keys.len() as u64);
    tracing::info!(
        job_id = %job_id,
        total_chunks = chunk_keys.len(),
        "Split complete, chunk tasks enqueued"
    );

    Ok(())
}

/// Split raw CSV bytes into chunk files of at most `chunk_lines` data
/// records each, every chunk carrying the original header. Record-aware:
/// quoted fields containing newlines never straddle a chunk boundary.
fn split_csv(bytes: &[u8], chunk_lines: usize) -> Result<Vec<Vec<u8>>, csv::Error> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let header = reader.byte_headers()?.clone();

    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut writer = None;
    let mut lines_in_chunk = 0usize;

    let mut record = ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        if writer.is_none() {
            let mut w = WriterBuilder::new().flexible(true).from_writer(Vec::new());
            w.write_byte_record(&header)?;
            writer = Some(w);
            lines_in_chunk = 0;
        }

        if let Some(w) = writer.as_mut() {
            w.write_byte_record(&record)?;
        }
        lines_in_chunk += 1;

        if lines_in_chunk >= chunk_lines {
            if let Some(w) = writer.take() {
                chunks.push(w.into_inner().map_err(|e| csv::Error::from(e.into_error()))?);
            }
        }
    }

    if let Some(w) = writer.take() {
        chunks.push(w.into_inner().map_err(|e| csv::Error::from(e.into_error()))?);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(chunk: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(chunk)
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn each_chunk_carries_the_header() {
        let csv = "Data,Canal\n1,a\n2,b\n3,c\n4,d\n5,e\n";
        let chunks = split_csv(csv.as_bytes(), 2).unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert_eq!(lines(chunk)[0], "Data,Canal");
        }
        assert_eq!(lines(&chunks[0]).len(), 3);
        assert_eq!(lines(&chunks[2]).len(), 2);
    }

    #[test]
    fn header_only_file_yields_no_chunks() {
        assert!(split_csv(b"Data,Canal\n", 100).unwrap().is_empty());
        assert!(split_csv(b"", 100).unwrap().is_empty());
    }

    #[test]
    fn quoted_newlines_stay_within_one_record() {
        let csv = "Data,Observação\n1,\"linha um\nlinha dois\"\n2,x\n";
        let chunks = split_csv(csv.as_bytes(), 1).unwrap();
        assert_eq!(chunks.len(), 2);
        // The embedded newline is re-quoted, not treated as a record break.
        assert!(String::from_utf8_lossy(&chunks[0]).contains("\"linha um\nlinha dois\""));
    }
}
