use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::dataset::{Dataset, DatasetStatus};
use crate::models::job::JobType;

const DATASET_COLUMNS: &str = "id, user_id, filename, dataset_type, status, row_count, uploaded_at";

fn map_dataset(row: &PgRow) -> Result<Dataset, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let type_str: String = row.try_get("dataset_type")?;
    Ok(Dataset {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        filename: row.try_get("filename")?,
        dataset_type: JobType::from_str(&type_str).unwrap_or(JobType::Transaction),
        status: DatasetStatus::from_str(&status_str).unwrap_or(DatasetStatus::Pending),
        row_count: row.try_get("row_count")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

/// Create a pending dataset for a new ingestion job.
pub async fn create_dataset(
    pool: &PgPool,
    user_id: i64,
    filename: &str,
    dataset_type: JobType,
) -> Result<Dataset, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO datasets (user_id, filename, dataset_type, status) \
         VALUES ($1, $2, $3, 'pending') \
         RETURNING {DATASET_COLUMNS}"
    ))
    .bind(user_id)
    .bind(filename)
    .bind(dataset_type.to_string())
    .fetch_one(pool)
    .await?;

    map_dataset(&row)
}

/// Get a dataset scoped to its owner.
pub async fn get_dataset(
    pool: &PgPool,
    dataset_id: i64,
    user_id: i64,
) -> Result<Option<Dataset>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {DATASET_COLUMNS} FROM datasets WHERE id = $1 AND user_id = $2"
    ))
    .bind(dataset_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_dataset).transpose()
}

/// Finalize an empty dataset (a source file with no data lines is valid and
/// immediately terminal).
pub async fn finalize_empty(pool: &PgPool, dataset_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE datasets SET status = 'completed', row_count = 0 WHERE id = $1")
        .bind(dataset_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a validation failure on the dataset.
pub async fn set_error(pool: &PgPool, dataset_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE datasets SET status = 'error' WHERE id = $1")
        .bind(dataset_id)
        .execute(pool)
        .await?;
    Ok(())
}
