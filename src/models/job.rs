use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an ingestion job.
///
/// `queued -> processing -> {completed | error | cancelled}`. The only
/// backward transition is an explicit retry, which re-enters `processing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal states cannot be left except through retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// States from which `retry_job` is accepted: everything but a
    /// successful completion, so jobs orphaned in `queued` or `processing`
    /// by a worker crash can be resubmitted.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Kind of report a job ingests. Determines the target row table and the
/// dimension set used for `row_hash`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    Transaction,
    Click,
}

/// One asynchronous ingestion request for one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub dataset_id: i64,
    pub user_id: i64,
    pub job_type: JobType,
    pub storage_key: String,
    pub status: JobStatus,
    pub total_chunks: i32,
    pub chunks_done: i32,
    /// Chunks that failed terminally. A failed chunk resolves without
    /// completing; the job finalizes only once done + failed covers every
    /// chunk.
    pub chunks_failed: i32,
    /// Source CSV data lines consumed so far, accumulated with `chunks_done`.
    /// Copied to the dataset's `row_count` at finalization.
    pub rows_ingested: i64,
    pub created_at: DateTime<Utc>,
}

/// Status of a single chunk. Terminal once set; retries happen at job level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkStatus {
    Queued,
    Done,
    Failed,
}

/// One unit of parallel work within a job. Keyed by (job_id, chunk_index);
/// `storage_key` is immutable once created and chunks are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobChunk {
    pub job_id: Uuid,
    pub chunk_index: i32,
    pub storage_key: String,
    pub status: ChunkStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(&s.to_string()).unwrap(), s);
        }
        assert_eq!(JobType::from_str("transaction").unwrap(), JobType::Transaction);
        assert_eq!(ChunkStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn retryable_excludes_only_completed() {
        assert!(JobStatus::Error.is_retryable());
        assert!(JobStatus::Cancelled.is_retryable());
        assert!(JobStatus::Queued.is_retryable());
        assert!(JobStatus::Processing.is_retryable());
        assert!(!JobStatus::Completed.is_retryable());
    }
}
