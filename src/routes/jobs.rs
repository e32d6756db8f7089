use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::dataset::Dataset;
use crate::models::job::{ChunkStatus, Job, JobType};
use crate::services::jobs::JobError;

/// Caller identity. Auth is handled upstream; the API trusts the forwarded
/// user id and scopes every query by it.
#[derive(Deserialize)]
pub struct UserScope {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub user_id: i64,
    pub filename: String,
    pub job_type: JobType,
}

#[derive(Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub dataset_id: i64,
    pub job_type: JobType,
    pub status: String,
    pub total_chunks: i32,
    pub chunks_done: i32,
    pub chunks_failed: i32,
    pub rows_ingested: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            dataset_id: job.dataset_id,
            job_type: job.job_type,
            status: job.status.to_string(),
            total_chunks: job.total_chunks,
            chunks_done: job.chunks_done,
            chunks_failed: job.chunks_failed,
            rows_ingested: job.rows_ingested,
            created_at: job.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub job: JobView,
    pub dataset: Dataset,
    pub upload_url: String,
}

#[derive(Serialize)]
pub struct ChunkView {
    pub chunk_index: i32,
    pub status: ChunkStatus,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub job: JobView,
    pub chunks: Vec<ChunkView>,
}

/// POST /api/v1/jobs — create a job and return the presigned upload URL.
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let created = state
        .jobs
        .create_job(req.user_id, &req.filename, req.job_type)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job: created.job.into(),
            dataset: created.dataset,
            upload_url: created.upload_url,
        }),
    ))
}

/// POST /api/v1/jobs/{job_id}/commit — start processing an uploaded file.
pub async fn commit_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(scope): Json<UserScope>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let job = state.jobs.commit_job(scope.user_id, job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// GET /api/v1/jobs/{job_id} — status snapshot with per-chunk errors.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(scope): Query<UserScope>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let snapshot = state.jobs.get_job(scope.user_id, job_id).await?;
    Ok(Json(JobStatusResponse {
        job: snapshot.job.into(),
        chunks: snapshot
            .chunks
            .into_iter()
            .map(|c| ChunkView {
                chunk_index: c.chunk_index,
                status: c.status,
                error: c.error,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub user_id: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    50
}

/// GET /api/v1/jobs — a user's jobs, most recent first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let jobs = state.jobs.list_jobs(query.user_id, query.limit).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// POST /api/v1/jobs/{job_id}/retry — resubmit a failed or cancelled job.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(scope): Json<UserScope>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let job = state.jobs.retry_job(scope.user_id, job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// POST /api/v1/jobs/{job_id}/cancel — stop an unfinished job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(scope): Json<UserScope>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.jobs.cancel_job(scope.user_id, job_id).await?;
    Ok(Json(job.into()))
}

#[derive(Serialize)]
pub struct MultipartInitResponse {
    pub job: JobView,
    pub dataset: Dataset,
    pub upload_id: String,
}

/// POST /api/v1/jobs/multipart — start a multipart upload for a large file.
pub async fn init_multipart(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<MultipartInitResponse>), ApiError> {
    let started = state
        .jobs
        .init_multipart(req.user_id, &req.filename, req.job_type)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MultipartInitResponse {
            job: started.job.into(),
            dataset: started.dataset,
            upload_id: started.upload_id,
        }),
    ))
}

#[derive(Deserialize)]
pub struct PartUrlRequest {
    pub user_id: i64,
    pub upload_id: String,
    pub part_number: u32,
}

#[derive(Serialize)]
pub struct PartUrlResponse {
    pub upload_url: String,
}

/// POST /api/v1/jobs/{job_id}/multipart/part-url — presign one part upload.
pub async fn multipart_part_url(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<PartUrlRequest>,
) -> Result<Json<PartUrlResponse>, ApiError> {
    let upload_url = state
        .jobs
        .multipart_part_url(req.user_id, job_id, &req.upload_id, req.part_number)
        .await?;
    Ok(Json(PartUrlResponse { upload_url }))
}

#[derive(Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Deserialize)]
pub struct CompleteMultipartRequest {
    pub user_id: i64,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

/// POST /api/v1/jobs/{job_id}/multipart/complete — assemble the parts and
/// commit the job in one step.
pub async fn complete_multipart(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<CompleteMultipartRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let parts = req
        .parts
        .into_iter()
        .map(|p| (p.part_number, p.etag))
        .collect();
    let job = state
        .jobs
        .complete_multipart(req.user_id, job_id, &req.upload_id, parts)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

#[derive(Deserialize)]
pub struct AbortMultipartRequest {
    pub user_id: i64,
    pub upload_id: String,
}

/// POST /api/v1/jobs/{job_id}/multipart/abort — abandon the upload and
/// cancel the job.
pub async fn abort_multipart(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<AbortMultipartRequest>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .jobs
        .abort_multipart(req.user_id, job_id, &req.upload_id)
        .await?;
    Ok(Json(job.into()))
}

/// Service errors mapped onto HTTP statuses with a JSON error body.
pub struct ApiError(JobError);

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Invalid state transitions and missing uploads are client
            // errors: the request itself is wrong for the job's state.
            JobError::InvalidUpload(_)
            | JobError::SourceMissing
            | JobError::NotCommittable(_)
            | JobError::NotRetryable(_)
            | JobError::AlreadyFinished(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound => StatusCode::NOT_FOUND,
            JobError::StorageUnconfigured => StatusCode::SERVICE_UNAVAILABLE,
            JobError::Db(_) | JobError::Storage(_) | JobError::Queue(_) => {
                tracing::error!(error = %self.0, "Job request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;

    #[test]
    fn invalid_state_transitions_map_to_bad_request() {
        for err in [
            JobError::NotCommittable(JobStatus::Processing),
            JobError::NotRetryable(JobStatus::Completed),
            JobError::AlreadyFinished(JobStatus::Completed),
            JobError::SourceMissing,
            JobError::InvalidUpload("not a csv".to_string()),
        ] {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn lookup_and_config_errors_keep_their_statuses() {
        assert_eq!(
            ApiError::from(JobError::NotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(JobError::StorageUnconfigured)
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
