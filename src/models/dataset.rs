use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::JobType;

/// Status of a dataset. `pending` until the owning job's last chunk
/// resolves, then finalized exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DatasetStatus {
    Pending,
    Completed,
    Error,
}

/// The logical, user-facing container a job's output rows belong to.
///
/// `row_count` reflects the number of source records consumed, not the
/// number of aggregated rows persisted, so user-facing totals match the
/// original file even after aggregation collapses duplicate keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub dataset_type: JobType,
    pub status: DatasetStatus,
    pub row_count: i64,
    pub uploaded_at: DateTime<Utc>,
}
