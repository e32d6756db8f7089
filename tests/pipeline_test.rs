use std::sync::Arc;

use report_ingest::{
    config::AppConfig,
    db::{self, job_queries},
    models::job::{ChunkStatus, JobStatus, JobType},
    services::{
        jobs::{JobError, JobService},
        queue::{TaskPayload, TaskQueue},
        storage::{ObjectStore, CSV_CONTENT_TYPE},
    },
    tasks::{chunk, split, TaskContext},
};

/// Integration tests for the full ingestion pipeline.
///
/// These require a running PostgreSQL, Redis, and S3-compatible store
/// (MinIO works) configured via environment variables.
///
/// The tests share one Redis queue, so run them serially:
/// cargo test --test pipeline_test -- --ignored --test-threads=1

struct Harness {
    ctx: TaskContext,
    service: JobService,
    queue: Arc<TaskQueue>,
}

async fn harness() -> Harness {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let storage_cfg = config.storage().expect("S3 settings required for this test");
    let storage = Arc::new(ObjectStore::new(&storage_cfg).expect("Failed to initialize storage"));
    let queue = Arc::new(TaskQueue::new(&config.redis_url).expect("Failed to initialize queue"));

    let service = JobService::new(db_pool.clone(), Some(storage.clone()), queue.clone());

    Harness {
        ctx: TaskContext {
            db: db_pool,
            storage,
            queue: queue.clone(),
            chunk_lines: 2, // small chunks so multi-chunk paths are exercised
        },
        service,
        queue,
    }
}

fn test_user() -> i64 {
    // Distinct per run so assertions never see another run's rows.
    chrono::Utc::now().timestamp_micros()
}

const CLICK_CSV: &[u8] = b"Data,Canal,Cliques\n\
01/01/2024,Instagram,5\n\
01/01/2024,Instagram,3\n\
02/01/2024,Facebook,2\n\
03/01/2024,Google,1\n\
03/01/2024,Google,4\n";

/// Drive a job through the worker tasks inline (no worker process needed):
/// run the split, then drain the queued chunk tasks.
async fn run_to_completion(h: &Harness, job_id: uuid::Uuid) {
    split::run(&h.ctx, job_id).await.expect("split failed");

    while let Some(task) = h.queue.dequeue().await.expect("dequeue failed") {
        if let TaskPayload::ProcessChunk {
            job_id: task_job,
            chunk_index,
            ref storage_key,
            ..
        } = task
        {
            if task_job == job_id {
                chunk::run(&h.ctx, task_job, chunk_index, storage_key)
                    .await
                    .expect("chunk failed");
            }
        }
        h.queue.complete(&task).await.expect("complete failed");
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL, Redis, and S3
async fn test_full_click_ingestion_flow() {
    let h = harness().await;
    let user_id = test_user();

    let created = h
        .service
        .create_job(user_id, "cliques.csv", JobType::Click)
        .await
        .expect("create_job failed");
    assert_eq!(created.job.status, JobStatus::Queued);
    assert!(created.upload_url.contains(&created.job.job_id.to_string()));

    // Upload the source bytes directly (a browser would use the presigned URL).
    h.ctx
        .storage
        .put(&created.job.storage_key, CLICK_CSV, CSV_CONTENT_TYPE)
        .await
        .expect("upload failed");

    let committed = h
        .service
        .commit_job(user_id, created.job.job_id)
        .await
        .expect("commit_job failed");
    assert_eq!(committed.status, JobStatus::Processing);

    // Execute the split task that commit enqueued, then its chunks.
    run_to_completion(&h, created.job.job_id).await;

    let snapshot = h
        .service
        .get_job(user_id, created.job.job_id)
        .await
        .expect("get_job failed");
    assert_eq!(snapshot.job.status, JobStatus::Completed);
    // 5 data lines at 2 lines per chunk = 3 chunks.
    assert_eq!(snapshot.job.total_chunks, 3);
    assert_eq!(snapshot.job.chunks_done, 3);
    assert_eq!(snapshot.job.rows_ingested, 5);
    assert!(snapshot
        .chunks
        .iter()
        .all(|c| c.status == ChunkStatus::Done));

    // Dataset finalized with the source line count, not the aggregated count.
    let dataset = report_ingest::db::dataset_queries::get_dataset(
        &h.ctx.db,
        snapshot.job.dataset_id,
        user_id,
    )
    .await
    .expect("get_dataset failed")
    .expect("dataset missing");
    assert_eq!(dataset.row_count, 5);
    assert_eq!(dataset.status.to_string(), "completed");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL, Redis, and S3
async fn test_reingestion_is_idempotent_and_keeps_dataset_ownership() {
    let h = harness().await;
    let user_id = test_user();

    let mut dataset_ids = Vec::new();
    for _ in 0..2 {
        let created = h
            .service
            .create_job(user_id, "cliques.csv", JobType::Click)
            .await
            .expect("create_job failed");
        h.ctx
            .storage
            .put(&created.job.storage_key, CLICK_CSV, CSV_CONTENT_TYPE)
            .await
            .expect("upload failed");
        h.service
            .commit_job(user_id, created.job.job_id)
            .await
            .expect("commit_job failed");
        run_to_completion(&h, created.job.job_id).await;
        dataset_ids.push(created.job.dataset_id);
    }

    // Same file twice: the row_hash conflict path updates in place, so the
    // user still has exactly 3 aggregated click rows, all owned by the
    // first ingestion's dataset.
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT dataset_id FROM click_rows WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&h.ctx.db)
            .await
            .expect("query failed");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(d,)| *d == dataset_ids[0]));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_concurrent_last_chunks_finalize_exactly_once() {
    let h = harness().await;
    let user_id = test_user();

    let dataset = report_ingest::db::dataset_queries::create_dataset(
        &h.ctx.db,
        user_id,
        "race.csv",
        JobType::Click,
    )
    .await
    .expect("create_dataset failed");

    let job_id = uuid::Uuid::new_v4();
    job_queries::create_job(&h.ctx.db, job_id, dataset.id, user_id, JobType::Click, "k")
        .await
        .expect("create_job failed");
    job_queries::register_chunks(
        &h.ctx.db,
        job_id,
        &["a.csv".to_string(), "b.csv".to_string()],
    )
    .await
    .expect("register_chunks failed");
    job_queries::set_job_status(&h.ctx.db, job_id, JobStatus::Processing)
        .await
        .expect("set status failed");

    let (a, b) = tokio::join!(
        job_queries::complete_chunk(&h.ctx.db, job_id, 0, 10),
        job_queries::complete_chunk(&h.ctx.db, job_id, 1, 10),
    );
    let a = a.expect("complete_chunk 0 failed");
    let b = b.expect("complete_chunk 1 failed");

    // Both completions land, but only one may observe the final count.
    assert_eq!(a.finalized as u8 + b.finalized as u8, 1);

    let job = job_queries::get_job(&h.ctx.db, job_id, None)
        .await
        .expect("get_job failed")
        .expect("job missing");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.chunks_done, 2);
    assert_eq!(job.rows_ingested, 20);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_failed_chunk_leaves_job_processing_until_all_resolve() {
    let h = harness().await;
    let user_id = test_user();

    let dataset = report_ingest::db::dataset_queries::create_dataset(
        &h.ctx.db,
        user_id,
        "parcial.csv",
        JobType::Click,
    )
    .await
    .expect("create_dataset failed");

    let job_id = uuid::Uuid::new_v4();
    job_queries::create_job(&h.ctx.db, job_id, dataset.id, user_id, JobType::Click, "k")
        .await
        .expect("create_job failed");
    job_queries::register_chunks(
        &h.ctx.db,
        job_id,
        &["a.csv".to_string(), "b.csv".to_string(), "c.csv".to_string()],
    )
    .await
    .expect("register_chunks failed");
    job_queries::set_job_status(&h.ctx.db, job_id, JobStatus::Processing)
        .await
        .expect("set status failed");

    let c0 = job_queries::complete_chunk(&h.ctx.db, job_id, 0, 5)
        .await
        .expect("complete_chunk 0 failed");
    assert!(!c0.finalized);

    // One chunk fails terminally; its siblings are unaffected and the job
    // must stay in processing until the last one resolves.
    let c1 = job_queries::fail_chunk(&h.ctx.db, job_id, 1, "unreadable chunk")
        .await
        .expect("fail_chunk failed");
    assert!(!c1.finalized);
    assert_eq!(c1.chunks_failed, 1);

    let mid = job_queries::get_job(&h.ctx.db, job_id, None)
        .await
        .expect("get_job failed")
        .expect("job missing");
    assert_eq!(mid.status, JobStatus::Processing);
    let mid_dataset =
        report_ingest::db::dataset_queries::get_dataset(&h.ctx.db, dataset.id, user_id)
            .await
            .expect("get_dataset failed")
            .expect("dataset missing");
    assert_eq!(mid_dataset.status.to_string(), "pending");

    // The last successful chunk resolves the set; the job finalizes as
    // error because a sibling failed.
    let c2 = job_queries::complete_chunk(&h.ctx.db, job_id, 2, 5)
        .await
        .expect("complete_chunk 2 failed");
    assert!(c2.finalized);
    assert_eq!(c2.chunks_failed, 1);

    let snapshot = h
        .service
        .get_job(user_id, job_id)
        .await
        .expect("get_job failed");
    assert_eq!(snapshot.job.status, JobStatus::Error);
    assert_eq!(snapshot.job.chunks_done, 2);
    assert_eq!(snapshot.job.chunks_failed, 1);
    assert_eq!(snapshot.chunks[1].status, ChunkStatus::Failed);
    assert_eq!(snapshot.chunks[1].error.as_deref(), Some("unreadable chunk"));

    let final_dataset =
        report_ingest::db::dataset_queries::get_dataset(&h.ctx.db, dataset.id, user_id)
            .await
            .expect("get_dataset failed")
            .expect("dataset missing");
    assert_eq!(final_dataset.status.to_string(), "error");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL, Redis, and S3
async fn test_retry_refuses_when_source_object_is_gone() {
    let h = harness().await;
    let user_id = test_user();

    let created = h
        .service
        .create_job(user_id, "sumiu.csv", JobType::Transaction)
        .await
        .expect("create_job failed");

    // Commit without an upload: the HEAD guard must reject it.
    let err = h
        .service
        .commit_job(user_id, created.job.job_id)
        .await
        .expect_err("commit should fail");
    assert!(matches!(err, JobError::SourceMissing));

    // Force the job into a retryable state, still with no object behind it.
    job_queries::set_job_status(&h.ctx.db, created.job.job_id, JobStatus::Error)
        .await
        .expect("set status failed");
    let err = h
        .service
        .retry_job(user_id, created.job.job_id)
        .await
        .expect_err("retry should fail");
    assert!(matches!(err, JobError::SourceMissing));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL, Redis, and S3
async fn test_cancelled_job_is_not_processed() {
    let h = harness().await;
    let user_id = test_user();

    let created = h
        .service
        .create_job(user_id, "cancelado.csv", JobType::Click)
        .await
        .expect("create_job failed");
    h.ctx
        .storage
        .put(&created.job.storage_key, CLICK_CSV, CSV_CONTENT_TYPE)
        .await
        .expect("upload failed");
    h.service
        .commit_job(user_id, created.job.job_id)
        .await
        .expect("commit_job failed");
    h.service
        .cancel_job(user_id, created.job.job_id)
        .await
        .expect("cancel_job failed");

    // The split task observes the cancellation and schedules nothing.
    split::run(&h.ctx, created.job.job_id)
        .await
        .expect("split failed");

    let snapshot = h
        .service
        .get_job(user_id, created.job.job_id)
        .await
        .expect("get_job failed");
    assert_eq!(snapshot.job.status, JobStatus::Cancelled);
    assert_eq!(snapshot.job.total_chunks, 0);

    // Cancelled jobs are retryable.
    h.ctx
        .storage
        .put(&created.job.storage_key, CLICK_CSV, CSV_CONTENT_TYPE)
        .await
        .expect("upload failed");
    let job = h
        .service
        .retry_job(user_id, created.job.job_id)
        .await
        .expect("retry_job failed");
    assert_eq!(job.status, JobStatus::Processing);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL, Redis, and S3
async fn test_empty_file_completes_immediately() {
    let h = harness().await;
    let user_id = test_user();

    let created = h
        .service
        .create_job(user_id, "vazio.csv", JobType::Click)
        .await
        .expect("create_job failed");
    h.ctx
        .storage
        .put(&created.job.storage_key, b"Data,Canal,Cliques\n", CSV_CONTENT_TYPE)
        .await
        .expect("upload failed");
    h.service
        .commit_job(user_id, created.job.job_id)
        .await
        .expect("commit_job failed");

    split::run(&h.ctx, created.job.job_id)
        .await
        .expect("split failed");

    let snapshot = h
        .service
        .get_job(user_id, created.job.job_id)
        .await
        .expect("get_job failed");
    assert_eq!(snapshot.job.status, JobStatus::Completed);
    assert_eq!(snapshot.job.total_chunks, 0);
    assert!(snapshot.chunks.is_empty());

    let dataset = report_ingest::db::dataset_queries::get_dataset(
        &h.ctx.db,
        snapshot.job.dataset_id,
        user_id,
    )
    .await
    .expect("get_dataset failed")
    .expect("dataset missing");
    assert_eq!(dataset.row_count, 0);
    assert_eq!(dataset.status.to_string(), "completed");
}
